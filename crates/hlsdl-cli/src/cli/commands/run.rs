//! `hlsdl run <task-id>` / `hlsdl run-all` – drive one or every pending
//! task through the Task Manager's admission loop.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use hlsdl_core::config::EngineConfig;
use hlsdl_core::events::EventKind;
use hlsdl_core::manager::{ManagerConfig, TaskManager};
use hlsdl_core::registry::{TaskRegistry, TaskRow};
use hlsdl_core::run::run_task_by_id;
use hlsdl_core::task::Task;

use super::context::build_pipeline_context;

fn manager_task_from_row(row: &TaskRow) -> Result<Task> {
    let url = url::Url::parse(&row.source_playlist_url)?;
    let base_url = url.join("./")?;
    Ok(Task::new(
        row.id.to_string(),
        row.name.clone(),
        url,
        base_url,
        PathBuf::from(&row.output_path),
        0,
        row.priority,
    ))
}

fn subscribe_progress(manager: &Arc<TaskManager>) {
    let started = manager.subscribe(EventKind::DownloadStarted, |event| {
        println!("task {} started", event.task_id);
    });
    let progress = manager.subscribe(EventKind::TaskProgress, |event| {
        println!("task {} progress: {}", event.task_id, event.payload);
    });
    let completed = manager.subscribe(EventKind::TaskCompleted, |event| {
        println!("task {} completed", event.task_id);
    });
    let failed = manager.subscribe(EventKind::TaskFailed, |event| {
        println!("task {} failed: {}", event.task_id, event.payload);
    });
    let errored = manager.subscribe(EventKind::ErrorOccurred, |event| {
        println!("task {} error: {}", event.task_id, event.payload);
    });
    // Handles must outlive run_all; the process exits once it returns.
    std::mem::forget(started);
    std::mem::forget(progress);
    std::mem::forget(completed);
    std::mem::forget(failed);
    std::mem::forget(errored);
}

async fn run_manager(manager: Arc<TaskManager>, registry: &TaskRegistry, ctx_cfg: &EngineConfig) -> Result<()> {
    let events = manager.events().clone();
    let ctx = build_pipeline_context(ctx_cfg, events.clone())?;
    subscribe_progress(&manager);

    let registry = Arc::new(registry.clone());
    let cfg = ctx_cfg.clone();
    manager
        .run_all(ctx, move |ctx, task_id, control| {
            let registry = Arc::clone(&registry);
            let cfg = cfg.clone();
            let events = events.clone();
            async move { run_task_by_id(ctx, registry, events, cfg, task_id, control).await }
        })
        .await;
    Ok(())
}

pub async fn run_run(registry: &TaskRegistry, cfg: &EngineConfig, task_id: i64) -> Result<()> {
    let Some(row) = registry.get(task_id).await? else {
        println!("No such task: {task_id}");
        return Ok(());
    };

    let manager = Arc::new(TaskManager::new(ManagerConfig {
        max_concurrent_tasks: 1,
    }));
    manager.add(manager_task_from_row(&row)?);
    run_manager(manager, registry, cfg).await
}

pub async fn run_run_all(registry: &TaskRegistry, cfg: &EngineConfig) -> Result<()> {
    let pending = registry.list_pending().await?;
    if pending.is_empty() {
        println!("No pending tasks.");
        return Ok(());
    }

    let manager = Arc::new(TaskManager::new(ManagerConfig {
        max_concurrent_tasks: cfg.download.max_concurrent_tasks,
    }));
    for row in &pending {
        manager.add(manager_task_from_row(row)?);
    }
    run_manager(manager, registry, cfg).await
}
