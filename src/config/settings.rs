//! Service settings
//!
//! Manages settings stored in ~/.pgbridge/config.toml

use crate::config::InstanceConfig;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project label the client is configured for; service handles may
    /// cross-check it against the project they expect.
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub transactions: TransactionSettings,
}

/// Sizing of the executor that runs blocking database calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Async worker threads that drive connection I/O
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Upper bound on concurrently running blocking calls
    #[serde(default = "default_blocking_threads")]
    pub blocking_threads: usize,

    /// Idle blocking threads exit after this many seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// On shutdown, how long to wait for calls already in flight
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// Retry budget for read-write transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_project() -> String {
    "default".to_string()
}

fn default_worker_threads() -> usize {
    1
}

fn default_blocking_threads() -> usize {
    64
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_thread_name() -> String {
    "pgbridge-blocking".to_string()
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: default_project(),
            bridge: BridgeSettings::default(),
            transactions: TransactionSettings::default(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            blocking_threads: default_blocking_threads(),
            keep_alive_secs: default_keep_alive_secs(),
            thread_name: default_thread_name(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl BridgeSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl TransactionSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Settings {
    /// Reject values that would leave the service unable to run anything
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bridge.blocking_threads == 0 {
            return Err(ConfigError::Invalid(
                "bridge.blocking_threads must be at least 1".into(),
            ));
        }
        if self.bridge.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "bridge.worker_threads must be at least 1".into(),
            ));
        }
        if self.transactions.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "transactions.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load settings from the default config file
pub fn load_settings() -> ConfigResult<Settings> {
    load_settings_from(&InstanceConfig::config_dir()?.join("config.toml"))
}

/// Load settings from `path`; a missing file means defaults
pub fn load_settings_from(path: &Path) -> ConfigResult<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}
