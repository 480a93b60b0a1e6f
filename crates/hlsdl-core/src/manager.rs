//! Task Manager (§4.— "Task Manager"): priority-queue admission under a
//! concurrency cap, emitting lifecycle events. Generalizes this
//! codebase's `scheduler::parallel::run_jobs_parallel` `tokio::JoinSet`
//! admission loop from a fixed job queue to a priority queue of tasks
//! with per-task cancel/pause control.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinSet;

use crate::events::{Event, EventBus, EventKind, SubscriptionHandle};
use crate::pipeline::{PipelineContext, TaskControl};
use crate::task::{Priority, Task, TaskStatus};

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub max_concurrent_tasks: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
        }
    }
}

struct QueueEntry {
    priority: Priority,
    enqueued_at: Instant,
    task_id: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want highest priority, then
        // earliest enqueue time, to come out first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(self.enqueued_at).cmp(&Reverse(other.enqueued_at)))
    }
}

struct RunningTask {
    control: TaskControl,
}

/// Owns all admitted tasks (§3's ownership summary). The queue holds ids
/// for tasks not yet admitted; `running` holds control handles for tasks
/// currently on a worker.
pub struct TaskManager {
    config: ManagerConfig,
    tasks: Mutex<HashMap<String, Task>>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    running: Mutex<HashMap<String, RunningTask>>,
    events: EventBus,
}

impl TaskManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(BinaryHeap::new()),
            running: Mutex::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    /// `add(task)` (§4.—): admits a task into the pending queue.
    pub fn add(&self, task: Task) {
        let entry = QueueEntry {
            priority: task.priority,
            enqueued_at: task.enqueued_at,
            task_id: task.id.clone(),
        };
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
        self.queue.lock().unwrap().push(entry);
    }

    /// `get(id)` (§4.—).
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.lock().unwrap().get(task_id).map(|t| t.status)
    }

    /// `pause(id)` (§4.—).
    pub fn pause(&self, task_id: &str) {
        if let Some(running) = self.running.lock().unwrap().get(task_id) {
            running.control.pause.store(true, std::sync::atomic::Ordering::Relaxed);
        }
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.status = TaskStatus::Paused;
        }
        self.events.emit(Event::new(EventKind::DownloadPaused, task_id, serde_json::json!({})));
    }

    /// `resume(id)` (§4.—): clears pause without re-admission.
    pub fn resume(&self, task_id: &str) {
        if let Some(running) = self.running.lock().unwrap().get(task_id) {
            running.control.pause.store(false, std::sync::atomic::Ordering::Relaxed);
        }
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.status = TaskStatus::Running;
        }
        self.events.emit(Event::new(EventKind::DownloadResumed, task_id, serde_json::json!({})));
    }

    /// `cancel(id)` (§4.—, §5): sets the cancel flag and releases any
    /// pause latch so a paused worker observes cancellation immediately.
    pub fn cancel(&self, task_id: &str) {
        if let Some(running) = self.running.lock().unwrap().get(task_id) {
            running.control.cancel.store(true, std::sync::atomic::Ordering::Relaxed);
            running.control.pause.store(false, std::sync::atomic::Ordering::Relaxed);
        }
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.status = TaskStatus::Canceled;
        }
        self.events.emit(Event::new(EventKind::DownloadCanceled, task_id, serde_json::json!({})));
    }

    /// `remove(id, delete_output)` (§4.—).
    pub fn remove(&self, task_id: &str, delete_output: bool) {
        let removed = self.tasks.lock().unwrap().remove(task_id);
        self.running.lock().unwrap().remove(task_id);
        if delete_output {
            if let Some(task) = removed {
                let _ = std::fs::remove_file(&task.output_path);
            }
        }
    }

    /// `list()` / `list_by_status()` (§4.—).
    pub fn list(&self) -> Vec<String> {
        self.tasks.lock().unwrap().keys().cloned().collect()
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }

    /// `subscribe`/`unsubscribe` (§4.—): unsubscription happens by
    /// dropping the returned handle.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn active_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn next_admittable(&self) -> Option<String> {
        let mut queue = self.queue.lock().unwrap();
        while let Some(entry) = queue.pop() {
            let tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get(&entry.task_id) {
                if matches!(
                    task.status,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
                ) {
                    continue;
                }
                return Some(entry.task_id);
            }
        }
        None
    }

    /// Runs the admission loop until the queue is drained, admitting up
    /// to `max_concurrent_tasks` tasks at once (§4.—, generalizing
    /// `scheduler::parallel::run_jobs_parallel`'s `JoinSet` loop). `runner`
    /// is invoked once per admitted task and is expected to run its
    /// Segment Pipeline and Merge Stage to completion.
    pub async fn run_all<F, Fut>(self: &Arc<Self>, pipeline_ctx: Arc<PipelineContext>, runner: F)
    where
        F: Fn(Arc<PipelineContext>, String, TaskControl) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let runner = Arc::new(runner);
        let mut joins = JoinSet::new();

        loop {
            while self.active_count() < self.config.max_concurrent_tasks {
                let Some(task_id) = self.next_admittable() else {
                    break;
                };
                let control = TaskControl::new();
                self.running
                    .lock()
                    .unwrap()
                    .insert(task_id.clone(), RunningTask { control: control.clone() });
                if let Some(task) = self.tasks.lock().unwrap().get_mut(&task_id) {
                    task.status = TaskStatus::Running;
                }
                self.events.emit(Event::new(EventKind::DownloadStarted, task_id.clone(), serde_json::json!({})));

                let ctx = Arc::clone(&pipeline_ctx);
                let runner = Arc::clone(&runner);
                let manager = Arc::clone(self);
                let task_id_for_join = task_id.clone();
                joins.spawn(async move {
                    runner(ctx, task_id.clone(), control).await;
                    manager.running.lock().unwrap().remove(&task_id);
                    task_id_for_join
                });
            }

            if joins.is_empty() {
                break;
            }
            if joins.join_next().await.is_none() {
                break;
            }
        }
    }

    pub fn output_path_for(&self, task_id: &str) -> Option<PathBuf> {
        self.tasks.lock().unwrap().get(task_id).map(|t| t.output_path.clone())
    }
}
