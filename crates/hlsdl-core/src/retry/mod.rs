//! Adaptive retry and backoff policy (§4.E).
//!
//! This module encapsulates error classification (timeouts, throttling,
//! connection failures), per-host health metrics, and network-aware
//! backoff decisions so that the Segment Pipeline can share a single
//! consistent policy across its worker pool.

mod metrics;
mod policy;
mod reason;
mod run;

pub use metrics::HostRetryMetrics;
pub use policy::{AdaptiveRetryPolicy, BackoffStrategy, RetryConfig};
pub use reason::{
    classify_curl_error, classify_http_status, classify_segment_error, is_non_retryable_text,
    RetryReason,
};
pub use run::run_with_retry;
