//! Task data model (§3): the unit of work the Task Manager schedules and
//! the Segment Pipeline executes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

/// Snapshot of a task's progress, refreshed as segments complete (§4.H
/// speed metering).
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub completed_segments: usize,
    pub total_segments: usize,
    pub bytes_downloaded: u64,
    pub estimated_total_bytes: Option<u64>,
    pub speed_bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn completed_fraction(&self) -> f64 {
        if self.total_segments == 0 {
            0.0
        } else {
            self.completed_segments as f64 / self.total_segments as f64
        }
    }
}

/// A unit of work admitted by the Task Manager (§3). Exclusively owns its
/// temporary directory and progress file once RUNNING.
pub struct Task {
    pub id: String,
    pub name: String,
    pub source_playlist_url: Url,
    pub base_url: Url,
    pub key_url: Option<Url>,
    pub iv: Option<[u8; 16]>,
    pub expected_segment_count: usize,
    pub output_path: PathBuf,
    pub priority: Priority,
    pub status: TaskStatus,
    pub progress: ProgressSnapshot,
    pub key_blob: Option<Vec<u8>>,
    pub temp_dir: Option<PathBuf>,
    pub keep_temp: bool,
    pub enqueued_at: Instant,
}

impl Task {
    pub fn new(
        id: String,
        name: String,
        source_playlist_url: Url,
        base_url: Url,
        output_path: PathBuf,
        expected_segment_count: usize,
        priority: Priority,
    ) -> Self {
        Self {
            id,
            name,
            source_playlist_url,
            base_url,
            key_url: None,
            iv: None,
            expected_segment_count,
            output_path,
            priority,
            status: TaskStatus::Pending,
            progress: ProgressSnapshot::default(),
            key_blob: None,
            temp_dir: None,
            keep_temp: false,
            enqueued_at: Instant::now(),
        }
    }

    /// Ordering key for the priority queue: higher priority first, then
    /// earlier enqueue time (§3 "priority queue (−priority, enqueue_time)").
    pub fn queue_key(&self) -> (std::cmp::Reverse<Priority>, Instant) {
        (std::cmp::Reverse(self.priority), self.enqueued_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn higher_priority_sorts_first() {
        let mut low = Task::new(
            "a".into(),
            "a".into(),
            url("https://e.com/a.m3u8"),
            url("https://e.com/"),
            "a.mp4".into(),
            10,
            Priority::Low,
        );
        let mut high = Task::new(
            "b".into(),
            "b".into(),
            url("https://e.com/b.m3u8"),
            url("https://e.com/"),
            "b.mp4".into(),
            10,
            Priority::High,
        );
        // Ensure deterministic enqueue ordering for the test.
        low.enqueued_at = Instant::now();
        high.enqueued_at = low.enqueued_at;
        assert!(high.queue_key() < low.queue_key());
    }

    #[test]
    fn progress_fraction_handles_zero_total() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.completed_fraction(), 0.0);
    }

    #[test]
    fn progress_fraction_computes_ratio() {
        let snapshot = ProgressSnapshot {
            completed_segments: 3,
            total_segments: 12,
            ..Default::default()
        };
        assert!((snapshot.completed_fraction() - 0.25).abs() < 1e-9);
    }
}
