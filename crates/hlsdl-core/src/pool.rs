//! Connection Pool (§4.B): per-host reusable curl sessions with size caps.
//! Grounded on this codebase's `downloader/segment.rs` curl::easy::Easy
//! configuration and the `host_policy` per-host-map idiom.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::host::HostKey;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_total: usize,
    pub max_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 20,
            max_per_host: 8,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// A curl handle reserved for one host, reused across requests to that
/// host to benefit from keep-alive. Configured the way
/// `downloader::segment::download_one_segment` configures its one-shot
/// handle, minus the per-request range/header setup (callers apply that).
pub struct PooledSession {
    pub host: HostKey,
    pub easy: curl::easy::Easy,
    checked_out_at: Instant,
}

impl PooledSession {
    fn fresh(host: HostKey) -> Self {
        let mut easy = curl::easy::Easy::new();
        let _ = easy.follow_location(true);
        let _ = easy.tcp_keepalive(true);
        Self {
            host,
            easy,
            checked_out_at: Instant::now(),
        }
    }
}

struct HostPool {
    idle: VecDeque<(curl::easy::Easy, Instant)>,
    semaphore: Arc<Semaphore>,
}

impl HostPool {
    fn new(max_per_host: usize) -> Self {
        Self {
            idle: VecDeque::new(),
            semaphore: Arc::new(Semaphore::new(max_per_host)),
        }
    }
}

/// Process-wide pool of per-host curl sessions (§4.B). Acquisition never
/// fails: under saturation the caller waits on the per-host semaphore,
/// cooperating with cancellation the way §5 describes for shared
/// resources.
pub struct ConnectionPool {
    config: PoolConfig,
    total: Arc<Semaphore>,
    hosts: Mutex<HashMap<HostKey, HostPool>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            total: Arc::new(Semaphore::new(config.max_total)),
            config,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// `acquire(url) -> PooledSession` (§4.B). Blocks until both the
    /// global and per-host permit are available.
    pub async fn acquire(&self, url: &str) -> anyhow::Result<PooledSession> {
        let host = HostKey::from_url(url)?;
        let host_semaphore = {
            let mut hosts = self.hosts.lock().unwrap();
            hosts
                .entry(host.clone())
                .or_insert_with(|| HostPool::new(self.config.max_per_host))
                .semaphore
                .clone()
        };

        // Permits are returned explicitly in `release`, not on guard drop,
        // so PooledSession doesn't need to carry a permit lifetime.
        let total_permit = self.total.clone().acquire_owned().await?;
        let host_permit = host_semaphore.acquire_owned().await?;
        std::mem::forget(total_permit);
        std::mem::forget(host_permit);

        let reused = {
            let mut hosts = self.hosts.lock().unwrap();
            hosts.get_mut(&host).and_then(|p| p.idle.pop_front())
        };

        match reused {
            Some((easy, _)) => Ok(PooledSession {
                host,
                easy,
                checked_out_at: Instant::now(),
            }),
            None => Ok(PooledSession::fresh(host)),
        }
    }

    /// `release(session, success)` (§4.B). On failure the session is
    /// discarded rather than returned to the idle pool. Idempotent:
    /// calling it releases the permits this session's `acquire` reserved.
    pub fn release(&self, session: PooledSession, success: bool) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(pool) = hosts.get_mut(&session.host) {
            pool.semaphore.add_permits(1);
            if success {
                pool.idle.push_back((session.easy, Instant::now()));
            }
        }
        self.total.add_permits(1);
    }

    /// Drops idle sessions that have exceeded `idle_timeout`. Intended to
    /// run periodically from a background task (§4.B "monitoring task").
    pub fn purge_idle(&self) {
        let mut hosts = self.hosts.lock().unwrap();
        for pool in hosts.values_mut() {
            pool.idle
                .retain(|(_, last_used)| last_used.elapsed() < self.config.idle_timeout);
        }
    }

    pub fn idle_count(&self, host: &HostKey) -> usize {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(host).map(|p| p.idle.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_reuses_session() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let session = pool.acquire("https://example.com/a.ts").await.unwrap();
        let host = session.host.clone();
        assert_eq!(pool.idle_count(&host), 0);
        pool.release(session, true);
        assert_eq!(pool.idle_count(&host), 1);

        let reused = pool.acquire("https://example.com/b.ts").await.unwrap();
        assert_eq!(pool.idle_count(&host), 0);
        pool.release(reused, true);
    }

    #[tokio::test]
    async fn failed_release_discards_session() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let session = pool.acquire("https://example.com/a.ts").await.unwrap();
        let host = session.host.clone();
        pool.release(session, false);
        assert_eq!(pool.idle_count(&host), 0);
    }

    #[tokio::test]
    async fn purge_idle_drops_stale_sessions() {
        let mut config = PoolConfig::default();
        config.idle_timeout = Duration::from_millis(1);
        let pool = ConnectionPool::new(config);
        let session = pool.acquire("https://example.com/a.ts").await.unwrap();
        let host = session.host.clone();
        pool.release(session, true);
        std::thread::sleep(Duration::from_millis(5));
        pool.purge_idle();
        assert_eq!(pool.idle_count(&host), 0);
    }

    #[tokio::test]
    async fn different_hosts_get_independent_pools() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let a = pool.acquire("https://a.example.com/x.ts").await.unwrap();
        let b = pool.acquire("https://b.example.com/x.ts").await.unwrap();
        assert_ne!(a.host, b.host);
        pool.release(a, true);
        pool.release(b, true);
    }
}
