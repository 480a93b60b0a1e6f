//! Retry loop: run a closure until success or the adaptive policy says stop.
//! Generalizes this codebase's original `run_with_retry` to per-host
//! adaptive delays and error-class-aware stop decisions (§4.E, §4.H).

use std::time::{Duration, Instant};

use crate::error::SegmentError;
use crate::host::HostKey;
use crate::timeout::AdaptiveTimeoutController;

use super::policy::AdaptiveRetryPolicy;
use super::reason::classify_segment_error;

/// Runs `f` until it succeeds or `policy.should_retry` says to stop.
/// Each attempt's outcome is recorded into `policy` for future decisions
/// on `host`. On retryable failure, sleeps for the adaptive backoff and
/// tries again.
pub fn run_with_retry<F>(
    policy: &AdaptiveRetryPolicy,
    timeouts: &AdaptiveTimeoutController,
    host: &HostKey,
    mut f: F,
) -> Result<(), SegmentError>
where
    F: FnMut() -> Result<(), SegmentError>,
{
    let mut attempt = 1u32;
    let mut last_latency: Option<Duration> = None;
    loop {
        let started = Instant::now();
        match f() {
            Ok(()) => {
                policy.record(host, super::reason::RetryReason::UnknownError, true, started.elapsed());
                return Ok(());
            }
            Err(e) => {
                let elapsed = started.elapsed();
                let reason = classify_segment_error(&e);
                policy.record(host, reason, false, elapsed);

                if matches!(e, SegmentError::Cancelled) {
                    return Err(e);
                }

                if !policy.should_retry(host, attempt, reason, Some(&e.to_string())) {
                    return Err(e);
                }

                let delay = policy.get_retry_delay(host, attempt, reason, last_latency, timeouts);
                std::thread::sleep(delay);
                last_latency = Some(elapsed);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::policy::RetryConfig;
    use std::cell::Cell;

    #[test]
    fn retries_until_success() {
        let policy = AdaptiveRetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        });
        let timeouts = AdaptiveTimeoutController::new(Default::default());
        let host = HostKey::from_url("https://example.com/a.ts").unwrap();
        let calls = Cell::new(0);
        let result = run_with_retry(&policy, &timeouts, &host, || {
            let n = calls.get() + 1;
            calls.set(n);
            if n < 3 {
                Err(SegmentError::Http { status: 503 })
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn stops_on_cancellation() {
        let policy = AdaptiveRetryPolicy::new(RetryConfig::default());
        let timeouts = AdaptiveTimeoutController::new(Default::default());
        let host = HostKey::from_url("https://example.com/a.ts").unwrap();
        let calls = Cell::new(0);
        let result = run_with_retry(&policy, &timeouts, &host, || {
            calls.set(calls.get() + 1);
            Err(SegmentError::Cancelled)
        });
        assert!(matches!(result, Err(SegmentError::Cancelled)));
        assert_eq!(calls.get(), 1);
    }
}
