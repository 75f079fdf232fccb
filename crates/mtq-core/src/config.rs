use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue_store::StorageRetry;
use crate::retry::{Backoff, RetryPolicy};

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds for backoff (e.g. 2.0 = 2s after the first failure).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// "exponential" (default) or "linear".
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 2.0,
            max_delay_secs: 300,
            backoff: Backoff::Exponential,
        }
    }
}

/// Bounded retry of storage lock contention (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Attempts per storage operation before it reports the store unavailable.
    pub max_attempts: u32,
    /// Base delay in milliseconds; doubled per attempt and jittered.
    pub base_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 25,
        }
    }
}

/// Global configuration loaded from `~/.config/mtq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtqConfig {
    /// Number of workers, i.e. the maximum number of concurrent transfers.
    pub max_parallel_transfers: usize,
    /// Priority given to tasks added without an explicit one.
    pub default_priority: i64,
    /// Attempt budget given to tasks added without an explicit one.
    pub default_max_retries: u32,
    /// A leased task that reports no byte progress for this long is failed (retryable).
    pub stall_timeout_secs: u64,
    /// How often idle workers re-check the queue and run state.
    pub poll_interval_ms: u64,
    /// Cancellation checkpoint interval: upper bound on cancel-to-abort latency.
    pub checkpoint_interval_ms: u64,
    /// Minimum interval between progress publications per task.
    pub progress_interval_ms: u64,
    /// Weight of byte-weighted progress vs per-task average progress for active transfers.
    #[serde(default = "default_byte_weight")]
    pub byte_weight: f64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional storage contention policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    /// Database file; defaults to `~/.local/state/mtq/queue.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_byte_weight() -> f64 {
    1.0
}

impl Default for MtqConfig {
    fn default() -> Self {
        Self {
            max_parallel_transfers: 5,
            default_priority: 0,
            default_max_retries: 3,
            stall_timeout_secs: 300,
            poll_interval_ms: 500,
            checkpoint_interval_ms: 250,
            progress_interval_ms: 250,
            byte_weight: default_byte_weight(),
            retry: None,
            storage: None,
            database_path: None,
        }
    }
}

/// Runtime knobs for the engine and worker pool, derived from `MtqConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: usize,
    pub default_priority: i64,
    pub default_max_retries: u32,
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
    pub checkpoint_interval: Duration,
    pub progress_interval: Duration,
    pub byte_weight: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        MtqConfig::default().engine_settings()
    }
}

impl MtqConfig {
    /// Fails when `[retry] base_delay_secs` is not a representable duration
    /// (e.g. `inf`). Negative values mean no delay.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let r = self.retry.clone().unwrap_or_default();
        let base_delay = Duration::try_from_secs_f64(r.base_delay_secs.max(0.0))
            .with_context(|| format!("invalid retry.base_delay_secs = {}", r.base_delay_secs))?;
        Ok(RetryPolicy {
            base_delay,
            max_delay: Duration::from_secs(r.max_delay_secs),
            backoff: r.backoff,
        })
    }

    pub fn storage_retry(&self) -> StorageRetry {
        let s = self.storage.clone().unwrap_or_default();
        StorageRetry {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workers: self.max_parallel_transfers.max(1),
            default_priority: self.default_priority,
            default_max_retries: self.default_max_retries.max(1),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs.max(1)),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms.max(1)),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            byte_weight: self.byte_weight.clamp(0.0, 1.0),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mtq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MtqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MtqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    parse_config(&data).with_context(|| format!("config {}", path.display()))
}

/// Parse and validate a config file's contents.
pub fn parse_config(data: &str) -> Result<MtqConfig> {
    let cfg: MtqConfig = toml::from_str(data)?;
    cfg.retry_policy()?;
    Ok(cfg)
}
