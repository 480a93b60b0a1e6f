//! End-to-end Segment Pipeline + Merge Stage test: three segments served
//! by independent in-process HTTP servers, fetched through the real
//! Connection Pool / Timeout / Circuit Breaker / Retry stack, then merged
//! into one file with a binary-concat fallback (no muxer on the test
//! machine).

mod common;

use std::sync::Arc;
use std::time::Duration;

use hlsdl_core::circuit::{CircuitBreaker, CircuitBreakerConfig};
use hlsdl_core::events::EventBus;
use hlsdl_core::memory::MemoryManager;
use hlsdl_core::merge::{merge_segments, sort_segment_paths};
use hlsdl_core::pipeline::{run_pipeline, PipelineContext, TaskControl};
use hlsdl_core::pool::{ConnectionPool, PoolConfig};
use hlsdl_core::recovery::RecoveryStore;
use hlsdl_core::retry::{AdaptiveRetryPolicy, RetryConfig};
use hlsdl_core::segment::{Segment, SegmentState};
use hlsdl_core::timeout::{AdaptiveTimeoutController, TimeoutConfig};

fn fresh_context(recovery_dir: &std::path::Path) -> Arc<PipelineContext> {
    Arc::new(PipelineContext {
        pool: Arc::new(ConnectionPool::new(PoolConfig::default())),
        timeouts: Arc::new(AdaptiveTimeoutController::new(TimeoutConfig::default())),
        circuit: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        retry: Arc::new(AdaptiveRetryPolicy::new(RetryConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        })),
        memory: Arc::new(MemoryManager::new()),
        recovery: Arc::new(RecoveryStore::new(recovery_dir.to_path_buf())),
        runtime: tokio::runtime::Handle::current(),
        events: EventBus::new(),
    })
}

use common::range_server;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipeline_then_merge_reassembles_segments() {
    let bodies: Vec<Vec<u8>> = vec![b"part-one--".to_vec(), b"part-two--".to_vec(), b"part-three".to_vec()];
    let urls: Vec<String> = bodies.iter().cloned().map(range_server::start).collect();

    let temp_dir = tempfile::tempdir().unwrap();
    let segments: Vec<Segment> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            Segment::new(
                i,
                url::Url::parse(url).unwrap(),
                temp_dir.path().join(format!("segment-{i:08}.ts")),
            )
        })
        .collect();

    let recovery_dir = tempfile::tempdir().unwrap();
    let ctx = fresh_context(recovery_dir.path());

    let control = TaskControl::new();
    let (completed, summary) = tokio::task::spawn_blocking(move || {
        run_pipeline(ctx, "task-1", segments, None, None, temp_dir.path().to_path_buf(), 3, control)
    })
    .await
    .unwrap();

    assert!(summary.invalid.is_empty(), "no segment should fail: {:?}", summary.invalid);
    assert_eq!(summary.completed.len(), 3);

    let mut paths: Vec<_> = completed.iter().map(|s| s.local_path.clone()).collect();
    sort_segment_paths(&mut paths);

    let output_dir = tempfile::tempdir().unwrap();
    let output_path = output_dir.path().join("merged.ts");
    merge_segments(&paths, &output_path, None, output_dir.path()).unwrap();

    let merged = std::fs::read(&output_path).unwrap();
    assert_eq!(merged, b"part-one--part-two--part-three".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipeline_reports_invalid_segment_on_404() {
    let good_url = range_server::start(b"ok-bytes".to_vec());
    let missing_url = "http://127.0.0.1:1/segment.ts".to_string(); // nothing listens here

    let temp_dir = tempfile::tempdir().unwrap();
    let segments = vec![
        Segment::new(0, url::Url::parse(&good_url).unwrap(), temp_dir.path().join("segment-00000000.ts")),
        Segment::new(1, url::Url::parse(&missing_url).unwrap(), temp_dir.path().join("segment-00000001.ts")),
    ];

    let recovery_dir = tempfile::tempdir().unwrap();
    let ctx = fresh_context(recovery_dir.path());

    let control = TaskControl::new();
    let (_completed, summary) = tokio::task::spawn_blocking(move || {
        run_pipeline(ctx, "task-2", segments, None, None, temp_dir.path().to_path_buf(), 2, control)
    })
    .await
    .unwrap();

    assert_eq!(summary.completed, vec![0]);
    assert_eq!(summary.invalid, vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_skips_segments_already_marked_complete() {
    let temp_dir = tempfile::tempdir().unwrap();

    // Segment 0 looks like it survived a prior crash: file already on
    // disk, state/checksum recorded.
    let seg0_path = temp_dir.path().join("segment-00000000.ts");
    std::fs::write(&seg0_path, b"already-here").unwrap();
    let mut seg0 = Segment::new(0, url::Url::parse("http://127.0.0.1:1/unused").unwrap(), seg0_path);
    seg0.state = SegmentState::Complete;
    seg0.checksum = Some("deadbeef".to_string());
    seg0.downloaded_size = 12;

    let fresh_url = range_server::start(b"fresh-bytes".to_vec());
    let seg1 = Segment::new(
        1,
        url::Url::parse(&fresh_url).unwrap(),
        temp_dir.path().join("segment-00000001.ts"),
    );

    let recovery_dir = tempfile::tempdir().unwrap();
    let ctx = fresh_context(recovery_dir.path());
    let control = TaskControl::new();
    let (segments, summary) = tokio::task::spawn_blocking(move || {
        run_pipeline(ctx, "task-3", vec![seg0, seg1], None, None, temp_dir.path().to_path_buf(), 2, control)
    })
    .await
    .unwrap();

    // Only the not-yet-complete segment is fetched this run.
    assert_eq!(summary.completed, vec![1]);
    assert_eq!(summary.invalid, Vec::<usize>::new());
    assert_eq!(std::fs::read(&segments[0].local_path).unwrap(), b"already-here");
    assert_eq!(std::fs::read(&segments[1].local_path).unwrap(), b"fresh-bytes");
}
