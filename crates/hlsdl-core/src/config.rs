//! Typed configuration (§6 "Configuration surface", §10.1). Replaces the
//! original's dynamic settings object with one struct passed into every
//! component's constructor (§9's re-architecture guidance).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_max_concurrent_tasks() -> usize {
    3
}
fn default_max_workers_per_task() -> usize {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_chunk_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_workers_per_task")]
    pub max_workers_per_task: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bytes per second; `None` means unlimited.
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_workers_per_task: default_max_workers_per_task(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            chunk_size: default_chunk_size(),
            bandwidth_limit: None,
        }
    }
}

fn default_connection_pool_size() -> usize {
    20
}
fn default_max_connections_per_host() -> usize {
    8
}
fn default_connection_timeout_secs() -> u64 {
    30
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_dns_cache_timeout_secs() -> u64 {
    300
}
fn default_keep_alive_timeout_secs() -> u64 {
    90
}
fn default_user_agent() -> String {
    "hlsdl/0.1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_dns_cache_timeout_secs")]
    pub dns_cache_timeout_secs: u64,
    #[serde(default = "default_keep_alive_timeout_secs")]
    pub keep_alive_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: default_user_agent(),
            verify_ssl: true,
            connection_pool_size: default_connection_pool_size(),
            max_connections_per_host: default_max_connections_per_host(),
            connection_timeout_secs: default_connection_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            dns_cache_timeout_secs: default_dns_cache_timeout_secs(),
            keep_alive_timeout_secs: default_keep_alive_timeout_secs(),
        }
    }
}

fn default_memory_limit_mb() -> u64 {
    512
}
fn default_buffer_min() -> usize {
    8 * 1024
}
fn default_buffer_default() -> usize {
    64 * 1024
}
fn default_buffer_max() -> usize {
    1024 * 1024
}
fn default_gc_threshold_mb() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceConfig {
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_buffer_min")]
    pub buffer_size_min: usize,
    #[serde(default = "default_buffer_max")]
    pub buffer_size_max: usize,
    #[serde(default = "default_buffer_default")]
    pub buffer_size_default: usize,
    #[serde(default = "default_gc_threshold_mb")]
    pub gc_threshold_mb: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            buffer_size_min: default_buffer_min(),
            buffer_size_max: default_buffer_max(),
            buffer_size_default: default_buffer_default(),
            gc_threshold_mb: default_gc_threshold_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdvancedConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default)]
    pub keep_temp_files: bool,
}

/// Configuration consumed by every engine component (§6, §9, §10.1).
/// Every field falls back to its stated default when absent from the TOML
/// file, via `#[serde(default = ...)]` on each leaf.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hlsdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
