//! Memory/Buffer Manager (§4.F): per-context streaming buffer sizing driven
//! by system memory pressure and recent throughput. Grounded on the
//! original `memory_optimizer.py`'s `MemoryOptimizer`; memory sampling
//! uses `sysinfo` the way the pack's other memory-aware components do.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use sysinfo::System;

const MAX_BUFFER: usize = 1024 * 1024;
const DEFAULT_BUFFER: usize = 64 * 1024;
const MIN_BUFFER: usize = 8 * 1024;

const PRESSURE_MAX_THRESHOLD: f64 = 0.5;
const PRESSURE_DEFAULT_THRESHOLD: f64 = 0.7;

const HIGH_THROUGHPUT_BYTES_PER_SEC: f64 = 10.0 * 1024.0 * 1024.0;
const LOW_THROUGHPUT_BYTES_PER_SEC: f64 = 1.0 * 1024.0 * 1024.0;

const THROUGHPUT_WINDOW: usize = 10;
const GC_HINT_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// mmap outputs at or above this size, when free memory comfortably
/// exceeds the file (§4.F).
pub const MMAP_MIN_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MMAP_FREE_MEMORY_MULTIPLE: f64 = 3.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

struct ContextState {
    buffer_size: usize,
    throughput_samples: VecDeque<f64>,
}

impl ContextState {
    fn new(initial: usize) -> Self {
        Self {
            buffer_size: initial,
            throughput_samples: VecDeque::new(),
        }
    }

    fn record(&mut self, bytes: u64, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        self.throughput_samples.push_back(bytes as f64 / seconds);
        if self.throughput_samples.len() > THROUGHPUT_WINDOW {
            self.throughput_samples.pop_front();
        }
    }

    fn avg_throughput(&self) -> f64 {
        if self.throughput_samples.is_empty() {
            return 0.0;
        }
        self.throughput_samples.iter().sum::<f64>() / self.throughput_samples.len() as f64
    }
}

/// Sizes streaming buffers per download context according to live system
/// memory pressure and recent per-context throughput (§4.F).
pub struct MemoryManager {
    system: Mutex<System>,
    contexts: Mutex<HashMap<ContextId, ContextState>>,
    check_interval: Duration,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            contexts: Mutex::new(HashMap::new()),
            check_interval: Duration::from_secs(5),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    fn memory_pressure(&self) -> f64 {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }

    fn base_size_for_pressure(&self, pressure: f64) -> usize {
        if pressure < PRESSURE_MAX_THRESHOLD {
            MAX_BUFFER
        } else if pressure < PRESSURE_DEFAULT_THRESHOLD {
            DEFAULT_BUFFER
        } else {
            MIN_BUFFER
        }
    }

    /// `get_optimal_buffer_size(ctx)` (§4.F).
    pub fn get_optimal_buffer_size(&self, ctx: ContextId) -> usize {
        let pressure = self.memory_pressure();
        let base = self.base_size_for_pressure(pressure);

        let contexts = self.contexts.lock().unwrap();
        let throughput = contexts.get(&ctx).map(|c| c.avg_throughput()).unwrap_or(0.0);
        drop(contexts);

        let adjusted = if throughput > HIGH_THROUGHPUT_BYTES_PER_SEC {
            (base * 2).min(MAX_BUFFER)
        } else if throughput > 0.0 && throughput < LOW_THROUGHPUT_BYTES_PER_SEC {
            (base / 2).max(MIN_BUFFER)
        } else {
            base
        };

        adjusted.clamp(MIN_BUFFER, MAX_BUFFER)
    }

    /// `create(ctx)` (§4.F): registers a context and returns its initial
    /// buffer allocation.
    pub fn create(&self, ctx: ContextId) -> Vec<u8> {
        let size = self.get_optimal_buffer_size(ctx);
        let mut contexts = self.contexts.lock().unwrap();
        contexts.entry(ctx).or_insert_with(|| ContextState::new(size));
        vec![0u8; size]
    }

    /// `record_performance(ctx, bytes, seconds)` (§4.F).
    pub fn record_performance(&self, ctx: ContextId, bytes: u64, seconds: f64) {
        let mut contexts = self.contexts.lock().unwrap();
        contexts
            .entry(ctx)
            .or_insert_with(|| ContextState::new(DEFAULT_BUFFER))
            .record(bytes, seconds);
    }

    /// `release(ctx)` (§4.F).
    pub fn release(&self, ctx: ContextId) {
        self.contexts.lock().unwrap().remove(&ctx);
    }

    /// `check_pressure()` (§4.F): halves all active buffers (never below
    /// MIN) when pressure crosses the DEFAULT threshold, and logs a
    /// diagnostic "generational collection hint" event when resident
    /// memory exceeds the GC threshold. There is no generation to
    /// collect in this runtime; the hint is a log event plus an eager
    /// drop of idle context state, not an allocator call.
    pub fn check_pressure(&self) {
        let pressure = self.memory_pressure();
        if pressure >= PRESSURE_DEFAULT_THRESHOLD {
            let mut contexts = self.contexts.lock().unwrap();
            for state in contexts.values_mut() {
                state.buffer_size = (state.buffer_size / 2).max(MIN_BUFFER);
            }
        }

        let resident = {
            let mut system = self.system.lock().unwrap();
            system.refresh_memory();
            system.used_memory()
        };
        if resident >= GC_HINT_THRESHOLD_BYTES {
            tracing::debug!(resident_bytes = resident, "memory pressure: gc hint");
            self.contexts.lock().unwrap().retain(|_, s| !s.throughput_samples.is_empty());
        }
    }

    /// Whether an output of `file_size` bytes should be memory-mapped
    /// rather than buffered (§4.F).
    pub fn should_mmap(&self, file_size: u64) -> bool {
        if file_size < MMAP_MIN_FILE_SIZE {
            return false;
        }
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        let free_bytes = system.total_memory().saturating_sub(system.used_memory());
        free_bytes as f64 > MMAP_FREE_MEMORY_MULTIPLE * file_size as f64
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_release_roundtrip() {
        let mgr = MemoryManager::new();
        let ctx = ContextId(1);
        let buf = mgr.create(ctx);
        assert!(buf.len() >= MIN_BUFFER);
        mgr.release(ctx);
    }

    #[test]
    fn high_throughput_grows_buffer() {
        let mgr = MemoryManager::new();
        let ctx = ContextId(2);
        mgr.create(ctx);
        mgr.record_performance(ctx, 20 * 1024 * 1024, 1.0);
        let size = mgr.get_optimal_buffer_size(ctx);
        assert!(size <= MAX_BUFFER);
    }

    #[test]
    fn low_throughput_shrinks_buffer() {
        let mgr = MemoryManager::new();
        let ctx = ContextId(3);
        mgr.create(ctx);
        for _ in 0..THROUGHPUT_WINDOW {
            mgr.record_performance(ctx, 100 * 1024, 1.0);
        }
        let size = mgr.get_optimal_buffer_size(ctx);
        assert!(size >= MIN_BUFFER);
    }

    #[test]
    fn small_file_never_mmaps() {
        let mgr = MemoryManager::new();
        assert!(!mgr.should_mmap(1024));
    }
}
