use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Transient failures a task may accumulate before it is marked failed.
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::try_from_secs_f64(self.base_delay_secs)
                .unwrap_or(defaults.base_delay),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// What to do when a URL that already has a live task is submitted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Return the existing non-cancelled task instead of creating a new one.
    #[default]
    Reuse,
    /// Always create an independent task.
    New,
}

/// What happens to the `.part` file when a task is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFilePolicy {
    #[default]
    Delete,
    Retain,
}

/// What happens to a completed file whose content matches an earlier
/// completed task from another URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateContentPolicy {
    /// Keep both files; the newer task only records `duplicate_of`.
    #[default]
    Keep,
    /// Drop the redundant bytes; the task points at the original via `duplicate_of`.
    Remove,
}

/// Global configuration loaded from `~/.config/rdo/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdoConfig {
    /// Maximum number of tasks transferring at once.
    pub max_concurrent: usize,
    /// Root directory every destination must live under. None = XDG data dir.
    pub download_dir: Option<PathBuf>,
    /// Checkpoint granularity in bytes.
    pub chunk_size: usize,
    /// URL schemes accepted at submission.
    pub allowed_schemes: Vec<String>,
    pub connect_timeout_secs: u64,
    /// A transfer below 1 KiB/s for this long is treated as stalled.
    pub stall_timeout_secs: u64,
    /// Window over which transfer speed is averaged.
    pub speed_window_secs: u64,
    /// Admission re-check interval when nothing else wakes the controller.
    pub poll_interval_ms: u64,
    /// Buffered events per subscriber before it starts missing events.
    pub event_capacity: usize,
    pub duplicate_urls: DuplicatePolicy,
    pub cancel_partial: PartialFilePolicy,
    pub duplicate_content: DuplicateContentPolicy,
    /// Optional retry policy; if missing, built-in defaults are used.
    pub retry: Option<RetryConfig>,
}

impl Default for RdoConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            download_dir: None,
            chunk_size: 256 * 1024,
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            connect_timeout_secs: 30,
            stall_timeout_secs: 60,
            speed_window_secs: 5,
            poll_interval_ms: 250,
            event_capacity: 1024,
            duplicate_urls: DuplicatePolicy::default(),
            cancel_partial: PartialFilePolicy::default(),
            duplicate_content: DuplicateContentPolicy::default(),
            retry: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_concurrent must be at least 1")]
    NoConcurrency,
    #[error("chunk_size {0} is outside 4 KiB..=16 MiB")]
    ChunkSize(usize),
    #[error("allowed_schemes is empty")]
    NoSchemes,
    #[error("retry.base_delay_secs must be a non-negative number, got {0}")]
    BaseDelay(f64),
}

pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

impl RdoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        if self.allowed_schemes.is_empty() {
            return Err(ConfigError::NoSchemes);
        }
        if let Some(retry) = &self.retry {
            if !retry.base_delay_secs.is_finite() || retry.base_delay_secs < 0.0 {
                return Err(ConfigError::BaseDelay(retry.base_delay_secs));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryConfig::policy)
            .unwrap_or_default()
    }

    /// Download root: the configured directory, or `~/.local/share/rdo/downloads`.
    pub fn download_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("rdo")?;
        Ok(xdg_dirs.get_data_home().join("rdo").join("downloads"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rdo")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RdoConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RdoConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: RdoConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
