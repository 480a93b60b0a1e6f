//! Segment Pipeline (§4.H): fetch -> decrypt -> validate -> persist for
//! every segment in a task, fanning out to a bounded worker pool.
//! Generalizes this codebase's `downloader::run::run_concurrent`
//! thread-per-worker queue to route through the pool, timeout, circuit
//! breaker, and adaptive retry components instead of a plain curl GET.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::circuit::CircuitBreaker;
use crate::error::SegmentError;
use crate::events::{Event, EventBus, EventKind};
use crate::host::HostKey;
use crate::memory::{ContextId, MemoryManager};
use crate::pool::ConnectionPool;
use crate::recovery::RecoveryStore;
use crate::retry::{run_with_retry, AdaptiveRetryPolicy};
use crate::segment::{derive_iv, Segment, SegmentDecryptor, SegmentState};
use crate::timeout::AdaptiveTimeoutController;

pub const DEFAULT_MAX_WORKERS_PER_TASK: usize = 10;
/// Speed metering exponential time-decay half-life (§4.H).
const SPEED_HALF_LIFE: Duration = Duration::from_secs(30);

/// Cooperative cancel/pause signals for one task, generalizing
/// `control::JobControl`'s single abort token to the cancel+pause pair
/// the Task Manager needs (§5).
#[derive(Clone)]
pub struct TaskControl {
    pub cancel: Arc<AtomicBool>,
    pub pause: Arc<AtomicBool>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    fn wait_if_paused(&self) {
        while self.pause.load(Ordering::Relaxed) && !self.cancel.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, process-wide building blocks the pipeline routes every fetch
/// through (§4.B-§4.F). `runtime` lets the sync worker threads drive the
/// Connection Pool's async `acquire`, which waits on a `tokio::Semaphore`.
pub struct PipelineContext {
    pub pool: Arc<ConnectionPool>,
    pub timeouts: Arc<AdaptiveTimeoutController>,
    pub circuit: Arc<CircuitBreaker>,
    pub retry: Arc<AdaptiveRetryPolicy>,
    pub memory: Arc<MemoryManager>,
    pub recovery: Arc<RecoveryStore>,
    pub runtime: tokio::runtime::Handle,
    /// Carries `TaskProgress` (and other lifecycle) events out to whoever
    /// subscribed on the Task Manager's bus (§6, §4.H step 7).
    pub events: EventBus,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub completed: Vec<usize>,
    pub invalid: Vec<usize>,
}

struct SpeedMeter {
    weighted_bytes: f64,
    last_sample: Instant,
}

impl SpeedMeter {
    fn new() -> Self {
        Self {
            weighted_bytes: 0.0,
            last_sample: Instant::now(),
        }
    }

    fn record(&mut self, bytes: u64) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample).as_secs_f64();
        let decay = 0.5f64.powf(elapsed / SPEED_HALF_LIFE.as_secs_f64());
        self.weighted_bytes = self.weighted_bytes * decay + bytes as f64;
        self.last_sample = now;
        if elapsed > 0.0 {
            self.weighted_bytes / elapsed.max(1.0)
        } else {
            self.weighted_bytes
        }
    }
}

/// Fetches, decrypts, and persists one segment (§4.H steps 1-6), routing
/// through the shared adaptive components. `key` is `None` for
/// unencrypted media playlists.
fn fetch_one_segment(
    ctx: &PipelineContext,
    segment: &mut Segment,
    key: Option<&[u8]>,
    explicit_iv: Option<[u8; 16]>,
    control: &TaskControl,
    temp_dir: &PathBuf,
) -> Result<u64, SegmentError> {
    if control.is_canceled() {
        return Err(SegmentError::Cancelled);
    }
    control.wait_if_paused();
    if control.is_canceled() {
        return Err(SegmentError::Cancelled);
    }

    let host = HostKey::from_url(segment.url.as_str())
        .map_err(|e| SegmentError::Decrypt(e.to_string()))?;
    if !ctx.circuit.can_execute(&host) {
        return Err(SegmentError::CircuitOpen);
    }

    let buffer_ctx = ContextId(segment.index as u64);
    let buffer_size = ctx.memory.get_optimal_buffer_size(buffer_ctx);
    let (connect_timeout, read_timeout) = ctx.timeouts.get_timeouts(&host);

    let final_path = temp_dir.join(format!("segment-{:08}.ts", segment.index));
    let temp_path = temp_dir.join(format!("segment-{:08}.ts.part", segment.index));

    let started = Instant::now();
    let raw_body: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    let mut session = ctx
        .runtime
        .block_on(ctx.pool.acquire(segment.url.as_str()))
        .map_err(|e| SegmentError::Decrypt(e.to_string()))?;
    let setup_result = session
        .easy
        .url(segment.url.as_str())
        .and_then(|_| session.easy.connect_timeout(connect_timeout))
        .and_then(|_| session.easy.timeout(read_timeout));
    if let Err(e) = setup_result {
        ctx.pool.release(session, false);
        return Err(e.into());
    }

    let transfer_result = {
        let raw_body = Arc::clone(&raw_body);
        let mut transfer = session.easy.transfer();
        transfer
            .write_function(move |data| {
                raw_body.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            })
            .and_then(|_| transfer.perform())
    };
    if let Err(e) = transfer_result {
        ctx.pool.release(session, false);
        return Err(e.into());
    }

    let status = match session.easy.response_code() {
        Ok(code) => code as u32,
        Err(e) => {
            ctx.pool.release(session, false);
            return Err(e.into());
        }
    };
    if !(200..300).contains(&status) {
        ctx.pool.release(session, false);
        return Err(SegmentError::Http { status });
    }
    ctx.pool.release(session, true);

    let raw_body = Arc::try_unwrap(raw_body)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();

    let plaintext = match key {
        Some(key) => {
            if control.is_canceled() {
                return Err(SegmentError::Cancelled);
            }
            let iv = derive_iv(explicit_iv, segment.index as u64);
            let mut decryptor = SegmentDecryptor::new(key, &iv)?;
            decrypt_streamed(&mut decryptor, &raw_body, buffer_size, control)?
        }
        None => raw_body,
    };

    std::fs::write(&temp_path, &plaintext).map_err(SegmentError::Storage)?;
    std::fs::rename(&temp_path, &final_path).map_err(SegmentError::Storage)?;

    let latency = started.elapsed();
    let received = plaintext.len() as u64;
    segment.local_path = final_path;
    segment.downloaded_size = received;
    segment.state = SegmentState::Complete;
    ctx.timeouts.record(&host, latency, true, None);
    ctx.circuit.record_success(&host);
    Ok(received)
}

/// Decrypts `ciphertext` in `chunk_size`-sized pieces, honoring cancel
/// between chunks (§4.H step 5). Each piece but the last is NUL-padded
/// internally by `SegmentDecryptor::decrypt_chunk`; the last is truncated
/// back to its pre-pad length.
fn decrypt_streamed(
    decryptor: &mut SegmentDecryptor,
    ciphertext: &[u8],
    chunk_size: usize,
    control: &TaskControl,
) -> Result<Vec<u8>, SegmentError> {
    let chunk_size = chunk_size.max(16);
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut offset = 0;
    while offset < ciphertext.len() {
        if control.is_canceled() {
            return Err(SegmentError::Cancelled);
        }
        control.wait_if_paused();
        let end = (offset + chunk_size).min(ciphertext.len());
        let is_last = end == ciphertext.len();
        plaintext.extend(decryptor.decrypt_chunk(&ciphertext[offset..end], is_last));
        offset = end;
    }
    if ciphertext.is_empty() {
        plaintext.extend(decryptor.decrypt_chunk(&[], true));
    }
    Ok(plaintext)
}

/// Runs every incomplete segment in `segments` through the pipeline with
/// up to `max_workers` concurrent workers, respecting `control`'s cancel
/// and pause signals (§4.H, §5).
pub fn run_pipeline(
    ctx: Arc<PipelineContext>,
    task_id: &str,
    mut segments: Vec<Segment>,
    key: Option<Vec<u8>>,
    explicit_iv: Option<[u8; 16]>,
    temp_dir: PathBuf,
    max_workers: usize,
    control: TaskControl,
) -> (Vec<Segment>, PipelineSummary) {
    let total_segments = segments.len();
    let incomplete_indices: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_complete())
        .map(|(i, _)| i)
        .collect();

    if incomplete_indices.is_empty() {
        return (segments, PipelineSummary::default());
    }

    let already_complete = total_segments - incomplete_indices.len();
    let progress_done = Arc::new(AtomicUsize::new(already_complete));

    let recovery_record = Arc::new(Mutex::new(
        ctx.recovery
            .load(task_id)
            .or_else(|_| ctx.recovery.create(task_id))
            .expect("recovery store is writable"),
    ));

    let work: Arc<Mutex<VecDeque<usize>>> =
        Arc::new(Mutex::new(incomplete_indices.into_iter().collect()));
    let (tx, rx) = mpsc::channel();
    let num_workers = max_workers.min(work.lock().unwrap().len()).max(1);
    let mut handles = Vec::with_capacity(num_workers);
    let segment_urls: Vec<_> = segments.iter().map(|s| s.url.clone()).collect();
    let segment_paths: Vec<_> = segments.iter().map(|s| s.local_path.clone()).collect();
    let task_id_owned = task_id.to_string();

    for _ in 0..num_workers {
        let work = Arc::clone(&work);
        let tx = tx.clone();
        let ctx = Arc::clone(&ctx);
        let control = control.clone();
        let key = key.clone();
        let temp_dir = temp_dir.clone();
        let recovery_record = Arc::clone(&recovery_record);
        let segment_urls = segment_urls.clone();
        let segment_paths = segment_paths.clone();
        let progress_done = Arc::clone(&progress_done);
        let task_id = task_id_owned.clone();
        handles.push(std::thread::spawn(move || {
            let mut meter = SpeedMeter::new();
            let mut results = Vec::new();
            loop {
                if control.is_canceled() {
                    break;
                }
                let index = match work.lock().unwrap().pop_front() {
                    Some(i) => i,
                    None => break,
                };
                let mut segment =
                    Segment::new(index, segment_urls[index].clone(), segment_paths[index].clone());

                let host = match HostKey::from_url(segment.url.as_str()) {
                    Ok(host) => host,
                    Err(e) => {
                        segment.state = SegmentState::Invalid;
                        tracing::warn!(index, error = %e, "invalid segment url");
                        results.push((index, segment));
                        let _ = tx.send(());
                        continue;
                    }
                };

                let outcome = run_with_retry(&ctx.retry, &ctx.timeouts, &host, || {
                    fetch_one_segment(&ctx, &mut segment, key.as_deref(), explicit_iv, &control, &temp_dir)
                        .map(|bytes| {
                            meter.record(bytes);
                        })
                });

                match outcome {
                    Ok(()) => {
                        let mut record = recovery_record.lock().unwrap();
                        let _ = ctx.recovery.mark_complete(
                            &mut record,
                            index,
                            segment.downloaded_size,
                            &segment.local_path,
                        );
                        drop(record);
                        let done = progress_done.fetch_add(1, Ordering::Relaxed) + 1;
                        ctx.events.emit(Event::new(
                            EventKind::TaskProgress,
                            task_id.clone(),
                            serde_json::json!({"completed": done, "total": total_segments}),
                        ));
                    }
                    Err(_) => {
                        ctx.circuit.record_failure(&host);
                        segment.state = SegmentState::Invalid;
                        let mut record = recovery_record.lock().unwrap();
                        let _ = ctx.recovery.mark_failed(&mut record, index);
                    }
                }

                results.push((index, segment));
                let _ = tx.send(());
            }
            results
        }));
    }
    drop(tx);
    for _ in rx.iter() {}

    let mut summary = PipelineSummary::default();
    for handle in handles {
        if let Ok(results) = handle.join() {
            for (index, segment) in results {
                if segment.state == SegmentState::Complete {
                    summary.completed.push(index);
                } else {
                    summary.invalid.push(index);
                }
                segments[index] = segment;
            }
        }
    }
    summary.completed.sort_unstable();
    summary.invalid.sort_unstable();

    (segments, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_control_cancel_is_observed() {
        let control = TaskControl::new();
        assert!(!control.is_canceled());
        control.cancel.store(true, Ordering::Relaxed);
        assert!(control.is_canceled());
    }

    #[test]
    fn speed_meter_returns_positive_rate() {
        let mut meter = SpeedMeter::new();
        std::thread::sleep(Duration::from_millis(5));
        let rate = meter.record(1024);
        assert!(rate >= 0.0);
    }
}
