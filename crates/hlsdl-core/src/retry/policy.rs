//! Adaptive Retry Policy (§4.E): per-host, per-error-class backoff
//! decisions. Grounded on the original `adaptive_retry.py`'s
//! `AdaptiveRetryManager`, generalizing this codebase's existing fixed
//! exponential-backoff `RetryPolicy`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::host::HostKey;
use crate::timeout::AdaptiveTimeoutController;

use super::metrics::HostRetryMetrics;
use super::reason::{is_non_retryable_text, RetryReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fibonacci,
    Jittered,
    Adaptive,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter_factor: f64,
    pub backoff_multiplier: f64,
    pub error_type_multipliers: HashMap<RetryReason, f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let mut error_type_multipliers = HashMap::new();
        error_type_multipliers.insert(RetryReason::NetworkTimeout, 2.0);
        error_type_multipliers.insert(RetryReason::ConnectionError, 1.5);
        error_type_multipliers.insert(RetryReason::HttpError, 1.0);
        error_type_multipliers.insert(RetryReason::ServerError, 3.0);
        error_type_multipliers.insert(RetryReason::RateLimited, 5.0);
        error_type_multipliers.insert(RetryReason::TemporaryFailure, 1.2);
        error_type_multipliers.insert(RetryReason::UnknownError, 1.0);

        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Adaptive,
            jitter_factor: 0.1,
            backoff_multiplier: 2.0,
            error_type_multipliers,
        }
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

const RATE_LIMITED_FLOOR: Duration = Duration::from_secs(30);

/// Intelligent retry manager with network-aware strategies, shared across
/// the Segment Pipeline's worker pool. One instance per engine.
pub struct AdaptiveRetryPolicy {
    default_config: RetryConfig,
    host_metrics: Mutex<HashMap<HostKey, HostRetryMetrics>>,
}

impl AdaptiveRetryPolicy {
    pub fn new(default_config: RetryConfig) -> Self {
        Self {
            default_config,
            host_metrics: Mutex::new(HashMap::new()),
        }
    }

    /// `should_retry(host, attempt, reason, error_text?) -> bool` (§4.E).
    pub fn should_retry(
        &self,
        host: &HostKey,
        attempt: u32,
        reason: RetryReason,
        error_text: Option<&str>,
    ) -> bool {
        if attempt >= self.default_config.max_attempts {
            return false;
        }
        if let Some(text) = error_text {
            if is_non_retryable_text(text) {
                return false;
            }
        }

        let metrics = self.host_metrics.lock().unwrap();
        if let Some(m) = metrics.get(host) {
            if !m.is_healthy() && attempt > 2 {
                return false;
            }
        }
        drop(metrics);

        match reason {
            RetryReason::RateLimited => true,
            RetryReason::NetworkTimeout | RetryReason::ConnectionError => true,
            RetryReason::ServerError => attempt <= 3,
            _ => true,
        }
    }

    /// `get_retry_delay(host, attempt, reason, last_latency?) -> Duration` (§4.E).
    pub fn get_retry_delay(
        &self,
        host: &HostKey,
        attempt: u32,
        reason: RetryReason,
        last_latency: Option<Duration>,
        timeouts: &AdaptiveTimeoutController,
    ) -> Duration {
        let base = self.base_delay_secs(attempt, reason);
        let adjusted = self.apply_network_adjustments(host, reason, last_latency, base, timeouts);
        let jittered = self.apply_jitter(adjusted);
        let floor = if reason == RetryReason::RateLimited {
            RATE_LIMITED_FLOOR.as_secs_f64()
        } else {
            0.1
        };
        let clamped = jittered.clamp(floor, self.default_config.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    fn base_delay_secs(&self, attempt: u32, reason: RetryReason) -> f64 {
        let base = self.default_config.base_delay.as_secs_f64();
        let mult = self.default_config.backoff_multiplier;
        let n = attempt.max(1);
        match self.default_config.strategy {
            BackoffStrategy::Exponential => base * mult.powi(n as i32 - 1),
            BackoffStrategy::Linear => base * n as f64,
            BackoffStrategy::Fibonacci => base * fibonacci(n) as f64,
            BackoffStrategy::Adaptive => {
                let exp = base * mult.powi(n as i32 - 1);
                let multiplier = self
                    .default_config
                    .error_type_multipliers
                    .get(&reason)
                    .copied()
                    .unwrap_or(1.0);
                exp * multiplier
            }
            BackoffStrategy::Jittered => {
                let exp = base * mult.powi(n as i32 - 1);
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                exp * jitter
            }
        }
    }

    fn apply_network_adjustments(
        &self,
        host: &HostKey,
        reason: RetryReason,
        last_latency: Option<Duration>,
        base: f64,
        timeouts: &AdaptiveTimeoutController,
    ) -> f64 {
        let mut delay = base;

        let quality = timeouts.network_quality();
        if quality < 0.8 {
            delay *= 2.0 - quality;
        }

        let metrics = self.host_metrics.lock().unwrap();
        if let Some(m) = metrics.get(host) {
            let success_rate = m.success_rate();
            if success_rate < 0.5 {
                delay *= 2.0 - success_rate;
            }
            if m.consecutive_failures > 3 {
                delay *= 1.0 + (m.consecutive_failures - 3) as f64 * 0.5;
            }
            if let Some(latency) = last_latency {
                if m.avg_response_time > 0.0 && latency.as_secs_f64() > m.avg_response_time * 2.0 {
                    delay *= 1.5;
                }
            }
            if m.dominant_error() == Some(reason)
                && matches!(reason, RetryReason::RateLimited | RetryReason::ServerError)
            {
                delay *= 2.0;
            }
        }

        delay
    }

    fn apply_jitter(&self, delay: f64) -> f64 {
        let factor = self.default_config.jitter_factor;
        if factor <= 0.0 {
            return delay;
        }
        let range = delay * factor;
        let jitter = rand::thread_rng().gen_range(-range..=range);
        delay + jitter
    }

    /// Record the outcome of an attempt for future adaptive decisions
    /// (§4.E via §4.H step 6/7).
    pub fn record(
        &self,
        host: &HostKey,
        reason: RetryReason,
        success: bool,
        response_time: Duration,
    ) {
        let mut metrics = self.host_metrics.lock().unwrap();
        metrics
            .entry(host.clone())
            .or_default()
            .record(reason, success, response_time.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostKey {
        HostKey::from_url("https://example.com/a.ts").unwrap()
    }

    #[test]
    fn respects_max_attempts() {
        let p = AdaptiveRetryPolicy::new(RetryConfig::default());
        let h = host();
        assert!(!p.should_retry(&h, 5, RetryReason::UnknownError, None));
    }

    #[test]
    fn non_retryable_text_blocks_retry() {
        let p = AdaptiveRetryPolicy::new(RetryConfig::default());
        let h = host();
        assert!(!p.should_retry(&h, 1, RetryReason::HttpError, Some("403 Forbidden")));
    }

    #[test]
    fn server_error_stops_after_three_attempts() {
        let p = AdaptiveRetryPolicy::new(RetryConfig::default());
        let h = host();
        assert!(p.should_retry(&h, 3, RetryReason::ServerError, None));
        assert!(!p.should_retry(&h, 4, RetryReason::ServerError, None));
    }

    #[test]
    fn rate_limited_delay_has_floor() {
        let p = AdaptiveRetryPolicy::new(RetryConfig::default());
        let h = host();
        let timeouts = AdaptiveTimeoutController::new(Default::default());
        let delay = p.get_retry_delay(&h, 1, RetryReason::RateLimited, None, &timeouts);
        assert!(delay >= Duration::from_secs(30));
    }

    #[test]
    fn delay_grows_with_attempt_number_under_exponential() {
        let mut cfg = RetryConfig::default();
        cfg.strategy = BackoffStrategy::Exponential;
        cfg.jitter_factor = 0.0;
        let p = AdaptiveRetryPolicy::new(cfg);
        let h = host();
        let timeouts = AdaptiveTimeoutController::new(Default::default());
        let d1 = p.get_retry_delay(&h, 1, RetryReason::UnknownError, None, &timeouts);
        let d2 = p.get_retry_delay(&h, 2, RetryReason::UnknownError, None, &timeouts);
        assert!(d2 >= d1);
    }
}
