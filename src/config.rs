//! Configuration loading for the outbox.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::RetryPolicy;
use crate::error::{Error, Result};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "OUTBOX_HOME";

/// Get the outbox home directory (`$OUTBOX_HOME` or ~/.outbox).
pub fn get_home_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }

    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".outbox"))
}

/// Get the settings file path.
pub fn get_settings_path(home: &Path) -> PathBuf {
    home.join("settings.json")
}

/// Load settings from `<home>/settings.json`.
pub fn load_settings(home: &Path) -> Result<Settings> {
    let path = get_settings_path(home);

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'outbox init' first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default(home: &Path) -> Settings {
    load_settings(home).unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

/// Write settings to `<home>/settings.json`.
pub fn save_settings(home: &Path, settings: &Settings) -> Result<()> {
    validate_settings(settings)?;
    std::fs::create_dir_all(home)?;
    let path = get_settings_path(home);
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    tracing::info!("Wrote settings to {}", path.display());
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.queue.retry_base_delay_ms > settings.queue.retry_max_delay_ms {
        return Err(Error::Config(format!(
            "queue.retry_base_delay_ms ({}) exceeds queue.retry_max_delay_ms ({})",
            settings.queue.retry_base_delay_ms, settings.queue.retry_max_delay_ms
        )));
    }
    if settings.delivery.batch_size == 0 {
        return Err(Error::Config("delivery.batch_size must be at least 1".to_string()));
    }
    if settings.delivery.poll_interval_ms == 0 {
        return Err(Error::Config(
            "delivery.poll_interval_ms must be at least 1".to_string(),
        ));
    }
    if settings.delivery.send_timeout_ms == 0 {
        return Err(Error::Config(
            "delivery.send_timeout_ms must be at least 1".to_string(),
        ));
    }
    if let Some(command) = &settings.delivery.command {
        if command.is_empty() {
            return Err(Error::Config(
                "delivery.command must name a program".to_string(),
            ));
        }
    }
    if settings.cache.capacity == 0 || settings.cache.max_per_entry == 0 {
        return Err(Error::Config(
            "cache.capacity and cache.max_per_entry must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Queue configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueueSettings {
    /// Retry cap, unbounded when absent
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Keep queue state in `<home>/queue.json`
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_retry_base_delay_ms() -> u64 {
    30_000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_persist() -> bool {
    true
}

impl QueueSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::unbounded().with_delays(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        );
        match self.max_retries {
            Some(max) => policy.with_max_retries(max),
            None => policy,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: None,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            persist: default_persist(),
        }
    }
}

/// Delivery worker configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeliverySettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Messages sent per worker pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Requeue failed messages once their backoff elapses
    #[serde(default = "default_auto_retry")]
    pub auto_retry: bool,
    /// External program that performs the send; dry run when absent
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Kill the send program after this long
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_auto_retry() -> bool {
    true
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

impl DeliverySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            auto_retry: default_auto_retry(),
            command: None,
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Delivered-message cache configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CacheSettings {
    /// Conversations kept
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Messages kept per conversation
    #[serde(default = "default_max_per_entry")]
    pub max_per_entry: usize,
}

fn default_cache_capacity() -> usize {
    200
}

fn default_max_per_entry() -> usize {
    50
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            max_per_entry: default_max_per_entry(),
        }
    }
}

/// Outbox settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,

    #[serde(default)]
    pub cache: CacheSettings,
}
