//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, ErrorCode, Result};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoreConfig {
    /// Upstream document-storage provider configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Background job configuration
    #[serde(default)]
    pub jobs: JobSettings,

    /// Batch processing configuration
    #[serde(default)]
    pub batch: BatchSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl CoreConfig {
    /// Load configuration from an optional TOML file plus `SATCHEL_`-prefixed
    /// environment variables (env wins).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SATCHEL")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                CoreError::with_internal(
                    ErrorCode::ConfigurationError,
                    "Failed to load configuration",
                    e.to_string(),
                )
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the provider's REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Directory for the file tier
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// TTL for the memory tier
    #[serde(default = "default_memory_ttl", with = "humantime_serde")]
    pub memory_ttl: Duration,

    /// TTL for the file tier
    #[serde(default = "default_file_ttl", with = "humantime_serde")]
    pub file_ttl: Duration,

    /// TTL for the remote tier
    #[serde(default = "default_remote_ttl", with = "humantime_serde")]
    pub remote_ttl: Duration,

    /// Maximum entries held in the memory tier
    #[serde(default = "default_max_memory_items")]
    pub max_memory_items: usize,

    /// Interval between background sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Optional Redis URL for the remote tier
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory_ttl: default_memory_ttl(),
            file_ttl: default_file_ttl(),
            remote_ttl: default_remote_ttl(),
            max_memory_items: default_max_memory_items(),
            sweep_interval: default_sweep_interval(),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSettings {
    /// Number of worker tasks
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// How long terminal jobs are retained before the reaper removes them
    #[serde(default = "default_job_ttl", with = "humantime_serde")]
    pub job_ttl: Duration,

    /// Interval between reaper wake-ups
    #[serde(default = "default_reap_interval", with = "humantime_serde")]
    pub reap_interval: Duration,

    /// Idle sleep between job-table scans when no work is pending
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Bound on how long shutdown waits for workers to drain
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            job_ttl: default_job_ttl(),
            reap_interval: default_reap_interval(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    /// Floor for the adaptive worker count
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Ceiling for the adaptive worker count
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Items per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum spacing between upstream calls across the whole pool
    #[serde(default, with = "humantime_serde::option")]
    pub throttle: Option<Duration>,

    /// Per-chunk timeout
    #[serde(default = "default_chunk_timeout", with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    /// Success-rate target (percent) for the adaptive controller
    #[serde(default = "default_target_success_rate")]
    pub target_success_rate: f64,

    /// Batches between adaptation decisions
    #[serde(default = "default_adaptation_interval")]
    pub adaptation_interval: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
            throttle: None,
            timeout: default_chunk_timeout(),
            target_success_rate: default_target_success_rate(),
            adaptation_interval: default_adaptation_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://api.box.com/2.0".to_string()
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}
fn default_memory_ttl() -> Duration {
    Duration::from_secs(300)
}
fn default_file_ttl() -> Duration {
    Duration::from_secs(3600)
}
fn default_remote_ttl() -> Duration {
    Duration::from_secs(86400)
}
fn default_max_memory_items() -> usize {
    1000
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_num_workers() -> usize {
    3
}
fn default_job_ttl() -> Duration {
    Duration::from_secs(86400)
}
fn default_reap_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_min_workers() -> usize {
    2
}
fn default_max_workers() -> usize {
    10
}
fn default_chunk_size() -> usize {
    10
}
fn default_chunk_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}
fn default_target_success_rate() -> f64 {
    95.0
}
fn default_adaptation_interval() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    false
}
