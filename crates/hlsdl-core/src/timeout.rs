//! Adaptive Timeout Controller (§4.C): per-host learned connect/read
//! timeouts from response-time history. Grounded on this codebase's
//! `host_policy` adaptive-state pattern (a per-host map behind one lock,
//! `to_snapshot`/pure-function transitions) and on the original's
//! `adaptive_timeout.py`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::host::HostKey;

const RESPONSE_WINDOW: usize = 100;
const MIN_SAMPLES_FOR_ADAPTATION: usize = 3;
const LEARNING_RATE: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub base_connection_timeout: Duration,
    pub base_read_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub timeout_multiplier: f64,
    pub stability_threshold: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_connection_timeout: Duration::from_secs(30),
            base_read_timeout: Duration::from_secs(60),
            min_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(300),
            timeout_multiplier: 1.5,
            stability_threshold: 0.8,
        }
    }
}

/// What kind of failure a request ended in, for the §4.E error-class counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connection,
    Other,
}

#[derive(Debug, Default)]
struct HostTimeoutMetrics {
    response_times: VecDeque<f64>,
    total_requests: u64,
    successful_requests: u64,
    timeout_failures: u64,
    connection_failures: u64,
}

impl HostTimeoutMetrics {
    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    fn add(&mut self, latency_secs: f64, success: bool, kind: Option<ErrorKind>) {
        self.response_times.push_back(latency_secs);
        if self.response_times.len() > RESPONSE_WINDOW {
            self.response_times.pop_front();
        }
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            match kind {
                Some(ErrorKind::Timeout) => self.timeout_failures += 1,
                Some(ErrorKind::Connection) => self.connection_failures += 1,
                _ => {}
            }
        }
    }

    fn avg_response_time(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
    }

    fn percentile(&self, pct: f64) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.response_times.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((pct / 100.0) * sorted.len() as f64) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Manages adaptive connect/read timeouts based on per-host network history
/// (§4.C) and a smoothed global network-quality score.
pub struct AdaptiveTimeoutController {
    config: TimeoutConfig,
    hosts: Mutex<HashMap<HostKey, HostTimeoutMetrics>>,
    global: Mutex<HostTimeoutMetrics>,
    network_quality: Mutex<f64>,
}

impl AdaptiveTimeoutController {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            hosts: Mutex::new(HashMap::new()),
            global: Mutex::new(HostTimeoutMetrics::default()),
            network_quality: Mutex::new(1.0),
        }
    }

    /// `get_timeouts(url) -> (connect_timeout, read_timeout)` (§4.C).
    pub fn get_timeouts(&self, host: &HostKey) -> (Duration, Duration) {
        let hosts = self.hosts.lock().unwrap();
        let metrics = match hosts.get(host) {
            Some(m) if m.response_times.len() >= MIN_SAMPLES_FOR_ADAPTATION => m,
            _ => {
                return (
                    self.config.base_connection_timeout,
                    self.config.base_read_timeout,
                )
            }
        };

        let p95 = metrics.percentile(95.0);
        let mut read = p95 * self.config.timeout_multiplier;

        let success_rate = metrics.success_rate();
        if success_rate < self.config.stability_threshold {
            read *= 2.0 - success_rate;
        }

        let quality = *self.network_quality.lock().unwrap();
        read *= 2.0 - quality;

        let read = read.clamp(
            self.config.min_timeout.as_secs_f64(),
            self.config.max_timeout.as_secs_f64(),
        );

        let connect = (read * 0.5)
            .min(self.config.base_connection_timeout.as_secs_f64())
            .max(self.config.min_timeout.as_secs_f64());

        (
            Duration::from_secs_f64(connect),
            Duration::from_secs_f64(read),
        )
    }

    /// `record(url, latency, success, error_kind)` (§4.C).
    pub fn record(&self, host: &HostKey, latency: Duration, success: bool, kind: Option<ErrorKind>) {
        let secs = latency.as_secs_f64();
        {
            let mut hosts = self.hosts.lock().unwrap();
            hosts
                .entry(host.clone())
                .or_default()
                .add(secs, success, kind);
        }
        {
            let mut global = self.global.lock().unwrap();
            global.add(secs, success, kind);
        }
        self.update_network_quality();
    }

    fn update_network_quality(&self) {
        let global = self.global.lock().unwrap();
        if global.total_requests < 10 {
            return;
        }
        let success_component = global.success_rate();
        let time_stability = if global.response_times.len() >= 10 {
            let avg = global.avg_response_time();
            let variance = global
                .response_times
                .iter()
                .map(|t| (t - avg).powi(2))
                .sum::<f64>()
                / global.response_times.len() as f64;
            let stddev = variance.sqrt();
            (1.0 - stddev / avg.max(1.0)).max(0.0)
        } else {
            1.0
        };
        let new_quality = success_component * 0.7 + time_stability * 0.3;
        let mut quality = self.network_quality.lock().unwrap();
        *quality = *quality * (1.0 - LEARNING_RATE) + new_quality * LEARNING_RATE;
    }

    pub fn network_quality(&self) -> f64 {
        *self.network_quality.lock().unwrap()
    }
}
