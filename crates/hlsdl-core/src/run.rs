//! Task lifecycle orchestration (§2's control flow, §4.— Task Manager):
//! admits one registry row, runs Analyzer -> Segment Pipeline -> Merge ->
//! integrity verification, and records the terminal status back to the
//! registry. This is the default `runner` a `TaskManager::run_all` caller
//! plugs in; the CLI only has to supply the registry row and shared
//! context.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::TaskError;
use crate::events::{Event, EventBus, EventKind};
use crate::merge::{probe_muxer, sort_segment_paths};
use crate::pipeline::{PipelineContext, TaskControl};
use crate::playlist::{self, EncryptionKind, FetchConfig};
use crate::registry::{TaskRegistry, TaskRow};
use crate::segment::Segment;
use crate::task::TaskStatus;
use crate::verify::{verify_output, IntegrityLevel};

fn emit(events: &EventBus, kind: EventKind, task_id: &str, payload: serde_json::Value) {
    events.emit(Event::new(kind, task_id, payload));
}

fn task_temp_dir(task_id: i64) -> Result<PathBuf, TaskError> {
    let dir = std::env::temp_dir().join("hlsdl").join(format!("task-{task_id}"));
    std::fs::create_dir_all(&dir).map_err(|e| TaskError::Internal(e.to_string()))?;
    Ok(dir)
}

/// Runs `row` to completion: fetch + parse its playlist, download every
/// segment through the Segment Pipeline, merge, verify, and persist the
/// terminal status to `registry` (§2, §4.H, §4.I, §9's integrity decision).
pub async fn run_task(
    ctx: Arc<PipelineContext>,
    registry: Arc<TaskRegistry>,
    events: EventBus,
    row: TaskRow,
    control: TaskControl,
    config: EngineConfig,
) -> Result<(), TaskError> {
    let task_id = row.id.to_string();
    emit(&events, EventKind::DownloadStarted, &task_id, serde_json::json!({}));

    let url = url::Url::parse(&row.source_playlist_url)
        .map_err(|e| TaskError::Playlist(crate::error::PlaylistError::InvalidUrl(e.to_string())))?;
    let fetch_config = FetchConfig {
        user_agent: config.network.user_agent.clone(),
        verify_ssl: config.network.verify_ssl,
        proxy: config.network.proxy.clone(),
        request_timeout: std::time::Duration::from_secs(config.network.read_timeout_secs),
    };

    if control.is_canceled() {
        return Err(TaskError::Cancelled);
    }

    let media = {
        let url = url.clone();
        tokio::task::spawn_blocking(move || playlist::analyze(&url, &fetch_config))
            .await
            .map_err(|e| TaskError::Internal(e.to_string()))??
    };

    let key = if media.encryption == EncryptionKind::Aes128 {
        let key_url = media.key_url.clone().ok_or_else(|| {
            TaskError::KeyUnavailable("AES-128 playlist missing key URI".to_string())
        })?;
        let headers = playlist::default_headers(&FetchConfig::default());
        let key_fetch_config = FetchConfig::default();
        let bytes = tokio::task::spawn_blocking(move || {
            playlist::fetch_url_bytes(key_url.as_str(), &headers, &key_fetch_config)
        })
        .await
        .map_err(|e| TaskError::Internal(e.to_string()))?
        .map_err(|e| TaskError::KeyUnavailable(e.to_string()))?;
        Some(bytes)
    } else {
        None
    };

    let temp_dir = task_temp_dir(row.id)?;
    let segments: Vec<Segment> = media
        .segment_urls
        .iter()
        .enumerate()
        .map(|(index, url)| {
            Segment::new(index, url.clone(), temp_dir.join(format!("segment-{index:08}.ts")))
        })
        .collect();
    let total = segments.len();

    if control.is_canceled() {
        return Err(TaskError::Cancelled);
    }

    let pipeline_ctx = Arc::clone(&ctx);
    let max_workers = config.download.max_workers_per_task;
    let pipeline_control = control.clone();
    let iv = media.iv;
    let task_id_for_pipeline = task_id.clone();
    let (completed_segments, summary) = tokio::task::spawn_blocking(move || {
        crate::pipeline::run_pipeline(
            pipeline_ctx,
            &task_id_for_pipeline,
            segments,
            key,
            iv,
            temp_dir,
            max_workers,
            pipeline_control,
        )
    })
    .await
    .map_err(|e| TaskError::Internal(e.to_string()))?;

    if !summary.invalid.is_empty() {
        registry
            .set_status(row.id, TaskStatus::Failed)
            .await
            .map_err(|e| TaskError::Internal(e.to_string()))?;
        emit(
            &events,
            EventKind::TaskFailed,
            &task_id,
            serde_json::json!({"missing": summary.invalid}),
        );
        return Err(TaskError::IncompleteSegments {
            completed: summary.completed.len(),
            total,
            missing: summary.invalid,
        });
    }

    let mut segment_paths: Vec<PathBuf> =
        completed_segments.iter().map(|s| s.local_path.clone()).collect();
    sort_segment_paths(&mut segment_paths);

    let muxer = probe_muxer(config.advanced.ffmpeg_path.as_deref().unwrap_or(""));
    let output_path = PathBuf::from(&row.output_path);
    let work_dir = output_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    crate::merge::merge_segments(&segment_paths, &output_path, muxer.as_deref(), &work_dir)
        .map_err(TaskError::Merge)?;

    let _ = verify_output(&output_path, IntegrityLevel::Checksum, None, muxer.as_deref());

    if !config.advanced.keep_temp_files {
        if let Some(parent) = segment_paths.first().and_then(|p| p.parent()) {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
    let _ = ctx.recovery.cleanup(&task_id);

    registry
        .set_status(row.id, TaskStatus::Completed)
        .await
        .map_err(|e| TaskError::Internal(e.to_string()))?;
    emit(
        &events,
        EventKind::TaskCompleted,
        &task_id,
        serde_json::json!({"output": row.output_path}),
    );

    Ok(())
}

/// Convenience wrapper for `TaskManager::run_all`'s `runner` callback:
/// loads the registry row for `task_id`, runs it, and swallows the error
/// into a log line (the manager doesn't propagate per-task failures to
/// the admission loop, matching `scheduler::run_jobs_parallel`'s
/// continue-past-one-job-failing behavior).
pub async fn run_task_by_id(
    ctx: Arc<PipelineContext>,
    registry: Arc<TaskRegistry>,
    events: EventBus,
    config: EngineConfig,
    task_id: String,
    control: TaskControl,
) {
    let Ok(id) = task_id.parse::<i64>() else {
        tracing::warn!(task_id, "non-numeric task id in registry runner");
        return;
    };
    let Ok(Some(row)) = registry.get(id).await else {
        tracing::warn!(task_id, "task disappeared from registry before admission");
        return;
    };
    if let Err(e) = run_task(ctx, Arc::clone(&registry), events.clone(), row, control, config).await {
        tracing::warn!(task_id, error = %e, "task failed");
        let _ = registry.set_status(id, TaskStatus::Failed).await;
        emit(&events, EventKind::ErrorOccurred, &task_id, serde_json::json!({"error": e.to_string()}));
    }
}
