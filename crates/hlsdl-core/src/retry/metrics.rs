//! Per-host retry metrics used by the adaptive delay/should-retry logic.
//! Grounded on the original `adaptive_retry.py`'s `HostRetryMetrics`.

use std::collections::VecDeque;
use std::time::Instant;

use super::reason::RetryReason;

const RECENT_ATTEMPTS_WINDOW: usize = 50;
/// "Healthy" thresholds from `HostRetryMetrics.is_healthy`.
const HEALTHY_SUCCESS_RATE: f64 = 0.7;
const HEALTHY_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const HEALTHY_LAST_SUCCESS_WITHIN: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug)]
pub struct HostRetryMetrics {
    total_attempts: u64,
    successful_attempts: u64,
    pub consecutive_failures: u32,
    pub avg_response_time: f64,
    error_counts: std::collections::HashMap<RetryReasonKey, u32>,
    last_success_at: Instant,
    recent: VecDeque<bool>,
}

/// `RetryReason` itself isn't `Hash`able by us without extending its
/// derive surface with `Eq`/`Hash` everywhere it's used as a tag value;
/// it already derives both, so this is just a readability alias.
type RetryReasonKey = RetryReason;

impl Default for HostRetryMetrics {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            successful_attempts: 0,
            consecutive_failures: 0,
            avg_response_time: 0.0,
            error_counts: std::collections::HashMap::new(),
            last_success_at: Instant::now(),
            recent: VecDeque::new(),
        }
    }
}

impl HostRetryMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            1.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }

    pub fn record(&mut self, reason: RetryReason, success: bool, response_time: f64) {
        self.total_attempts += 1;
        self.recent.push_back(success);
        if self.recent.len() > RECENT_ATTEMPTS_WINDOW {
            self.recent.pop_front();
        }
        if success {
            self.successful_attempts += 1;
            self.last_success_at = Instant::now();
            self.consecutive_failures = 0;
            self.avg_response_time = if self.avg_response_time == 0.0 {
                response_time
            } else {
                self.avg_response_time * 0.8 + response_time * 0.2
            };
        } else {
            self.consecutive_failures += 1;
            *self.error_counts.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn dominant_error(&self) -> Option<RetryReason> {
        self.error_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(reason, _)| *reason)
    }

    pub fn is_healthy(&self) -> bool {
        self.success_rate() >= HEALTHY_SUCCESS_RATE
            && self.consecutive_failures < HEALTHY_MAX_CONSECUTIVE_FAILURES
            && self.last_success_at.elapsed() < HEALTHY_LAST_SUCCESS_WITHIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_starts_optimistic() {
        let m = HostRetryMetrics::default();
        assert_eq!(m.success_rate(), 1.0);
        assert!(m.is_healthy());
    }

    #[test]
    fn dominant_error_tracks_most_common_reason() {
        let mut m = HostRetryMetrics::default();
        m.record(RetryReason::ServerError, false, 0.0);
        m.record(RetryReason::ServerError, false, 0.0);
        m.record(RetryReason::RateLimited, false, 0.0);
        assert_eq!(m.dominant_error(), Some(RetryReason::ServerError));
    }

    #[test]
    fn unhealthy_after_many_consecutive_failures() {
        let mut m = HostRetryMetrics::default();
        for _ in 0..5 {
            m.record(RetryReason::ServerError, false, 0.0);
        }
        assert!(!m.is_healthy());
    }
}
