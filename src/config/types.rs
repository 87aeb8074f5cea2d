use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub collector: CollectorConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Stamped on entries that arrive without one. Empty means "use the host name".
    #[serde(default)]
    pub machine_id: String,
    pub log_directory: PathBuf,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: usize,
    #[serde(default = "default_max_batch_entries")]
    pub max_batch_entries: usize,
    #[serde(default = "default_max_buffer_batches_per_cycle")]
    pub max_buffer_batches_per_cycle: usize,
    #[serde(default = "default_upload_interval", with = "humantime_serde")]
    pub upload_interval: Duration,
    #[serde(default = "default_buffer_directory")]
    pub buffer_directory: PathBuf,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

fn default_file_pattern() -> String {
    "*.log".to_string()
}

fn default_max_batch_size_bytes() -> usize {
    1024 * 1024
}

fn default_max_batch_entries() -> usize {
    1000
}

fn default_max_buffer_batches_per_cycle() -> usize {
    100
}

fn default_upload_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_buffer_directory() -> PathBuf {
    PathBuf::from("buffer")
}

fn default_max_concurrent_files() -> usize {
    4
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

impl CollectorConfig {
    /// Settings with every optional field at its default.
    pub fn with_directories(log_directory: PathBuf, buffer_directory: PathBuf) -> Self {
        Self {
            machine_id: String::new(),
            log_directory,
            file_pattern: default_file_pattern(),
            max_batch_size_bytes: default_max_batch_size_bytes(),
            max_batch_entries: default_max_batch_entries(),
            max_buffer_batches_per_cycle: default_max_buffer_batches_per_cycle(),
            upload_interval: default_upload_interval(),
            buffer_directory,
            max_concurrent_files: default_max_concurrent_files(),
            retry: RetryConfig::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }

    /// `machine_id`, or the host name when it is unset.
    pub fn effective_machine_id(&self) -> String {
        if !self.machine_id.trim().is_empty() {
            return self.machine_id.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn positions_directory(&self) -> PathBuf {
        self.buffer_directory.join("positions")
    }

    pub fn batches_directory(&self) -> PathBuf {
        self.buffer_directory.join("batches")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts made after the first one fails.
    #[serde(default = "default_retry_count")]
    pub count: u32,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_exponential_backoff() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: default_retry_count(),
            interval: default_retry_interval(),
            exponential_backoff: default_exponential_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Rotation and retention knobs. Parsed so existing config files keep loading,
/// but nothing in the agent enforces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    #[serde(default = "default_rotation_interval_days")]
    pub rotation_interval_days: u32,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_rotation_interval_days() -> u32 {
    1
}

fn default_max_file_size_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_retention_days() -> u32 {
    7
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            rotation_interval_days: default_rotation_interval_days(),
            max_file_size_bytes: default_max_file_size_bytes(),
            retention_days: default_retention_days(),
        }
    }
}
