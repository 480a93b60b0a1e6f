//! Circuit Breaker (§4.D): per-host CLOSED/OPEN/HALF_OPEN state machine
//! gating requests. Grounded on the original `circuit_breaker.py`'s rolling
//! boolean window and this codebase's per-host-map-behind-one-lock idiom.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::host::HostKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub window: usize,
    pub min_requests: usize,
    pub failure_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            window: 20,
            min_requests: 10,
            failure_rate_threshold: 0.5,
        }
    }
}

struct HostCircuit {
    state: CircuitState,
    entered_at: Instant,
    results: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_probes: u32,
}

impl HostCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            entered_at: Instant::now(),
            results: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_probes: 0,
        }
    }

    fn failure_rate(&self, window: usize) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let failures = self.results.iter().filter(|ok| !**ok).count();
        failures as f64 / self.results.len().min(window).max(1) as f64
    }

    fn push_result(&mut self, success: bool, window: usize) {
        self.results.push_back(success);
        if self.results.len() > window {
            self.results.pop_front();
        }
    }
}

/// Thresholds and state are keyed per host; each host's state machine is
/// independently mutated under the shared map lock (§5's shared-resource
/// policy — reads may use a snapshot, writes are per-host serialized).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: Mutex<HashMap<HostKey, HostCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether a request to `host` may proceed right now, possibly
    /// transitioning OPEN -> HALF_OPEN as a side effect if the timeout has
    /// elapsed (§4.D).
    pub fn can_execute(&self, host: &HostKey) -> bool {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.clone()).or_insert_with(HostCircuit::new);
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => circuit.half_open_probes < self.config.success_threshold,
            CircuitState::Open => {
                if circuit.entered_at.elapsed() >= self.config.open_timeout {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.entered_at = Instant::now();
                    circuit.half_open_probes = 0;
                    circuit.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, host: &HostKey) {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.clone()).or_insert_with(HostCircuit::new);
        circuit.push_result(true, self.config.window);
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_probes += 1;
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.config.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {
                // Success cannot occur while OPEN (§4.D): can_execute() would
                // have denied the call. Ignore defensively.
            }
        }
    }

    pub fn record_failure(&self, host: &HostKey) {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.clone()).or_insert_with(HostCircuit::new);
        match circuit.state {
            CircuitState::Closed => {
                circuit.push_result(false, self.config.window);
                circuit.consecutive_failures += 1;
                let rate_tripped = circuit.results.len() >= self.config.min_requests
                    && circuit.failure_rate(self.config.window) >= self.config.failure_rate_threshold;
                if circuit.consecutive_failures >= self.config.failure_threshold || rate_tripped {
                    circuit.state = CircuitState::Open;
                    circuit.entered_at = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.entered_at = Instant::now();
                circuit.consecutive_successes = 0;
                circuit.half_open_probes = 0;
            }
            CircuitState::Open => {
                // Ignored: caller is blocked anyway (§4.D).
            }
        }
    }

    pub fn force_open(&self, host: &HostKey) {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.clone()).or_insert_with(HostCircuit::new);
        circuit.state = CircuitState::Open;
        circuit.entered_at = Instant::now();
    }

    pub fn force_close(&self, host: &HostKey) {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.clone()).or_insert_with(HostCircuit::new);
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.consecutive_successes = 0;
    }

    pub fn reset(&self, host: &HostKey) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.remove(host);
    }

    pub fn state(&self, host: &HostKey) -> CircuitState {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(host).map(|c| c.state).unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostKey {
        HostKey::from_url("https://example.com/a.ts").unwrap()
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let h = host();
        for _ in 0..4 {
            assert!(cb.can_execute(&h));
            cb.record_failure(&h);
        }
        assert_eq!(cb.state(&h), CircuitState::Closed);
        cb.record_failure(&h); // 5th consecutive failure
        assert_eq!(cb.state(&h), CircuitState::Open);
        assert!(!cb.can_execute(&h));
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_success_threshold() {
        let mut cfg = CircuitBreakerConfig::default();
        cfg.open_timeout = Duration::from_millis(1);
        let cb = CircuitBreaker::new(cfg);
        let h = host();
        for _ in 0..5 {
            cb.record_failure(&h);
        }
        assert_eq!(cb.state(&h), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.can_execute(&h));
        assert_eq!(cb.state(&h), CircuitState::HalfOpen);

        cb.record_success(&h);
        cb.record_success(&h);
        assert_eq!(cb.state(&h), CircuitState::HalfOpen);
        cb.record_success(&h);
        assert_eq!(cb.state(&h), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut cfg = CircuitBreakerConfig::default();
        cfg.open_timeout = Duration::from_millis(1);
        let cb = CircuitBreaker::new(cfg);
        let h = host();
        for _ in 0..5 {
            cb.record_failure(&h);
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.can_execute(&h));
        cb.record_failure(&h);
        assert_eq!(cb.state(&h), CircuitState::Open);
    }

    #[test]
    fn failure_rate_trip_without_consecutive_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let h = host();
        // Alternate success/failure to avoid hitting consecutive_failures=5,
        // but keep the rolling failure rate at 50% over >= min_requests.
        for i in 0..10 {
            if i % 2 == 0 {
                cb.record_success(&h);
            } else {
                cb.record_failure(&h);
            }
        }
        assert_eq!(cb.state(&h), CircuitState::Open);
    }

    #[test]
    fn force_open_and_close() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let h = host();
        cb.force_open(&h);
        assert!(!cb.can_execute(&h));
        cb.force_close(&h);
        assert!(cb.can_execute(&h));
    }
}
