//! Assembles the `PipelineContext` shared across every worker thread of a
//! `run`/`run-all` invocation, wiring §4.B-§4.F's components from one
//! loaded `EngineConfig`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use hlsdl_core::circuit::{CircuitBreaker, CircuitBreakerConfig};
use hlsdl_core::config::EngineConfig;
use hlsdl_core::events::EventBus;
use hlsdl_core::memory::MemoryManager;
use hlsdl_core::pipeline::PipelineContext;
use hlsdl_core::pool::{ConnectionPool, PoolConfig};
use hlsdl_core::recovery::RecoveryStore;
use hlsdl_core::retry::{AdaptiveRetryPolicy, RetryConfig};
use hlsdl_core::timeout::{AdaptiveTimeoutController, TimeoutConfig};

pub fn build_pipeline_context(cfg: &EngineConfig, events: EventBus) -> Result<Arc<PipelineContext>> {
    let pool = ConnectionPool::new(PoolConfig {
        max_total: cfg.network.connection_pool_size,
        max_per_host: cfg.network.max_connections_per_host,
        idle_timeout: Duration::from_secs(cfg.network.keep_alive_timeout_secs),
    });

    let timeouts = AdaptiveTimeoutController::new(TimeoutConfig {
        base_connection_timeout: Duration::from_secs(cfg.network.connection_timeout_secs),
        base_read_timeout: Duration::from_secs(cfg.network.read_timeout_secs),
        ..TimeoutConfig::default()
    });

    let circuit = CircuitBreaker::new(CircuitBreakerConfig::default());

    let retry = AdaptiveRetryPolicy::new(RetryConfig {
        max_attempts: cfg.download.max_retries,
        base_delay: Duration::from_millis(cfg.download.retry_delay_ms),
        ..RetryConfig::default()
    });

    let xdg_dirs = xdg::BaseDirectories::with_prefix("hlsdl")?;
    let recovery_root = xdg_dirs.get_state_home().join("recovery");
    std::fs::create_dir_all(&recovery_root)?;

    Ok(Arc::new(PipelineContext {
        pool: Arc::new(pool),
        timeouts: Arc::new(timeouts),
        circuit: Arc::new(circuit),
        retry: Arc::new(retry),
        memory: Arc::new(MemoryManager::new()),
        recovery: Arc::new(RecoveryStore::new(recovery_root)),
        runtime: tokio::runtime::Handle::current(),
        events,
    }))
}
