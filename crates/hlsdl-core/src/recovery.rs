//! Progressive Recovery Store (§4.G): per-task on-disk record of segment
//! completion used to resume interrupted downloads. Grounded on this
//! codebase's `host_policy::persist` XDG-rooted JSON save/load pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::checksum::sha256_path;
use crate::error::RecoveryError;

const CURRENT_RECOVERY_VERSION: u32 = 1;
const RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
pub const COALESCE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordedSegmentState {
    Pending,
    Partial,
    Complete,
    Corrupted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub index: usize,
    pub url: String,
    pub bytes: u64,
    pub expected_size: Option<u64>,
    pub path: Option<PathBuf>,
    pub checksum: Option<String>,
    pub state: RecordedSegmentState,
    pub retry_count: u32,
}

impl SegmentRecord {
    fn new(index: usize, url: String) -> Self {
        Self {
            index,
            url,
            bytes: 0,
            expected_size: None,
            path: None,
            checksum: None,
            state: RecordedSegmentState::Pending,
            retry_count: 0,
        }
    }
}

/// Self-describing, forward-compatible on-disk record for one task (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub recovery_version: u32,
    pub task_id: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub segments: HashMap<usize, SegmentRecord>,
    pub closed: bool,
}

impl RecoveryRecord {
    fn new(task_id: &str) -> Self {
        let now = unix_now();
        Self {
            recovery_version: CURRENT_RECOVERY_VERSION,
            task_id: task_id.to_string(),
            created_at: now,
            updated_at: now,
            segments: HashMap::new(),
            closed: false,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default)]
pub struct ResumeInfo {
    pub total: usize,
    pub completed: usize,
    pub resumable: Vec<usize>,
    pub completed_indices: Vec<usize>,
    pub total_bytes: u64,
}

/// Manages one task's progress file plus a `backups/` sibling directory
/// (§4.G). `root_dir` is the directory holding one JSON file per task id.
pub struct RecoveryStore {
    root_dir: PathBuf,
}

impl RecoveryStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.root_dir.join(format!("{task_id}.json"))
    }

    fn backup_path(&self, task_id: &str) -> PathBuf {
        self.root_dir.join("backups").join(format!("{task_id}.json"))
    }

    /// `create(task_id)` (§4.G).
    pub fn create(&self, task_id: &str) -> Result<RecoveryRecord, RecoveryError> {
        let record = RecoveryRecord::new(task_id);
        self.save(&record)?;
        Ok(record)
    }

    /// `load(task_id)` (§4.G). Validates each segment's on-disk file
    /// against its recorded byte count, marking mismatches CORRUPTED.
    pub fn load(&self, task_id: &str) -> Result<RecoveryRecord, RecoveryError> {
        let path = self.record_path(task_id);
        let bytes = std::fs::read(&path)
            .map_err(|_| RecoveryError::NotFound(task_id.to_string()))?;
        let mut record: RecoveryRecord = serde_json::from_slice(&bytes)?;

        for seg in record.segments.values_mut() {
            if seg.state == RecordedSegmentState::Complete {
                let on_disk_ok = match &seg.path {
                    Some(p) => std::fs::metadata(p)
                        .map(|m| m.len() == seg.bytes)
                        .unwrap_or(false),
                    None => false,
                };
                if !on_disk_ok {
                    seg.state = RecordedSegmentState::Corrupted;
                }
            }
        }
        Ok(record)
    }

    fn save(&self, record: &RecoveryRecord) -> Result<(), RecoveryError> {
        std::fs::create_dir_all(&self.root_dir)?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.record_path(&record.task_id), &json)?;
        Ok(())
    }

    /// `update_segment_progress(index, url, bytes, path?, expected_size?)`
    /// (§4.G). Callers are expected to coalesce calls to roughly
    /// `COALESCE_INTERVAL` while a run is active.
    pub fn update_segment_progress(
        &self,
        record: &mut RecoveryRecord,
        index: usize,
        url: &str,
        bytes: u64,
        path: Option<PathBuf>,
        expected_size: Option<u64>,
    ) -> Result<(), RecoveryError> {
        let seg = record
            .segments
            .entry(index)
            .or_insert_with(|| SegmentRecord::new(index, url.to_string()));
        seg.bytes = bytes;
        if let Some(p) = path {
            seg.path = Some(p);
        }
        if let Some(size) = expected_size {
            seg.expected_size = Some(size);
        }
        if seg.state == RecordedSegmentState::Pending {
            seg.state = RecordedSegmentState::Partial;
        }
        record.updated_at = unix_now();
        self.save(record)
    }

    /// `mark_complete(index, final_size, path)` (§4.G): always persisted
    /// immediately, regardless of the coalescing interval.
    pub fn mark_complete(
        &self,
        record: &mut RecoveryRecord,
        index: usize,
        final_size: u64,
        path: &Path,
    ) -> Result<(), RecoveryError> {
        let checksum = sha256_path(path).ok();
        let seg = record
            .segments
            .entry(index)
            .or_insert_with(|| SegmentRecord::new(index, String::new()));
        seg.bytes = final_size;
        seg.path = Some(path.to_path_buf());
        seg.checksum = checksum;
        seg.state = RecordedSegmentState::Complete;
        record.updated_at = unix_now();
        self.save(record)
    }

    /// `mark_failed(index)` (§4.G).
    pub fn mark_failed(&self, record: &mut RecoveryRecord, index: usize) -> Result<(), RecoveryError> {
        let seg = record
            .segments
            .entry(index)
            .or_insert_with(|| SegmentRecord::new(index, String::new()));
        seg.retry_count += 1;
        seg.state = RecordedSegmentState::Failed;
        record.updated_at = unix_now();
        self.save(record)
    }

    /// `can_resume(record)` (§4.G): true if any segment has completed.
    pub fn can_resume(&self, record: &RecoveryRecord) -> bool {
        record
            .segments
            .values()
            .any(|s| s.state == RecordedSegmentState::Complete)
    }

    /// `get_resume_info(record, total)` (§4.G).
    pub fn get_resume_info(&self, record: &RecoveryRecord, total: usize) -> ResumeInfo {
        let mut info = ResumeInfo {
            total,
            ..Default::default()
        };
        for seg in record.segments.values() {
            match seg.state {
                RecordedSegmentState::Complete => {
                    info.completed += 1;
                    info.completed_indices.push(seg.index);
                    info.total_bytes += seg.bytes;
                }
                RecordedSegmentState::Corrupted
                | RecordedSegmentState::Failed
                | RecordedSegmentState::Partial
                | RecordedSegmentState::Pending => {
                    info.resumable.push(seg.index);
                }
            }
        }
        info.completed_indices.sort_unstable();
        info.resumable.sort_unstable();
        info
    }

    /// `complete(record)` (§4.G): final save and mark closed.
    pub fn complete(&self, record: &mut RecoveryRecord) -> Result<(), RecoveryError> {
        record.closed = true;
        record.updated_at = unix_now();
        self.save(record)
    }

    /// `cleanup(task_id)` (§4.G): deletes the record and its backup.
    pub fn cleanup(&self, task_id: &str) -> Result<(), RecoveryError> {
        let _ = std::fs::remove_file(self.record_path(task_id));
        let _ = std::fs::remove_file(self.backup_path(task_id));
        Ok(())
    }

    /// `list_all()` (§4.G).
    pub fn list_all(&self) -> Result<Vec<String>, RecoveryError> {
        if !self.root_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Prunes records whose `updated_at` is older than 7 days (§4.G),
    /// intended to run at startup.
    pub fn prune_stale(&self) -> Result<(), RecoveryError> {
        let now = unix_now();
        for task_id in self.list_all()? {
            if let Ok(record) = self.load(&task_id) {
                if now.saturating_sub(record.updated_at) > RETENTION.as_secs() {
                    self.cleanup(&task_id)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = RecoveryStore::new(dir.path().to_path_buf());
        store.create("task-1").unwrap();
        let loaded = store.load("task-1").unwrap();
        assert_eq!(loaded.task_id, "task-1");
        assert_eq!(loaded.recovery_version, CURRENT_RECOVERY_VERSION);
    }

    #[test]
    fn mark_complete_validates_against_disk_on_reload() {
        let dir = tempdir().unwrap();
        let store = RecoveryStore::new(dir.path().to_path_buf());
        let mut record = store.create("task-2").unwrap();

        let seg_path = dir.path().join("seg0.ts");
        std::fs::write(&seg_path, b"hello world").unwrap();
        store.mark_complete(&mut record, 0, 11, &seg_path).unwrap();

        let reloaded = store.load("task-2").unwrap();
        assert_eq!(
            reloaded.segments[&0].state,
            RecordedSegmentState::Complete
        );

        // Now truncate the file on disk; reload should flag CORRUPTED.
        std::fs::write(&seg_path, b"short").unwrap();
        let reloaded_again = store.load("task-2").unwrap();
        assert_eq!(
            reloaded_again.segments[&0].state,
            RecordedSegmentState::Corrupted
        );
    }

    #[test]
    fn get_resume_info_separates_completed_and_resumable() {
        let dir = tempdir().unwrap();
        let store = RecoveryStore::new(dir.path().to_path_buf());
        let mut record = store.create("task-3").unwrap();

        let seg_path = dir.path().join("seg0.ts");
        std::fs::write(&seg_path, b"data").unwrap();
        store.mark_complete(&mut record, 0, 4, &seg_path).unwrap();
        store
            .update_segment_progress(&mut record, 1, "https://e.com/1.ts", 2, None, Some(10))
            .unwrap();

        let info = store.get_resume_info(&record, 3);
        assert_eq!(info.completed, 1);
        assert_eq!(info.completed_indices, vec![0]);
        assert!(info.resumable.contains(&1));
        assert!(store.can_resume(&record));
    }

    #[test]
    fn cleanup_removes_record() {
        let dir = tempdir().unwrap();
        let store = RecoveryStore::new(dir.path().to_path_buf());
        store.create("task-4").unwrap();
        store.cleanup("task-4").unwrap();
        assert!(store.load("task-4").is_err());
    }
}
