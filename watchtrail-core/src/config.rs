//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/watchtrail/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/watchtrail/` (~/.config/watchtrail/)
//! - Data: `$XDG_DATA_HOME/watchtrail/` (~/.local/share/watchtrail/)
//! - State/Logs: `$XDG_STATE_HOME/watchtrail/` (~/.local/state/watchtrail/)

use crate::error::{Error, Result};
use crate::types::MAX_WATCH_MS_DELTA;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Session tracking cadence and accounting bounds
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Ingest collector delivery settings
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session tracking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Minimum playing time between two periodic ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Upper bound on any single accounted interval (bounds sleep/suspend error)
    #[serde(default = "default_max_tick_delta")]
    pub max_tick_delta_ms: u64,

    /// Player poll cadence
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Navigation observer cadence
    #[serde(default = "default_observe_interval")]
    pub observe_interval_ms: u64,

    /// At most one `context_missing` per window
    #[serde(default = "default_context_missing_window")]
    pub context_missing_window_ms: u64,

    /// How long to wait for channel identity before starting a session anyway
    #[serde(default = "default_context_wait")]
    pub context_wait_ms: u64,

    /// How often to re-query channel identity while waiting
    #[serde(default = "default_context_poll")]
    pub context_poll_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            max_tick_delta_ms: default_max_tick_delta(),
            poll_interval_ms: default_poll_interval(),
            observe_interval_ms: default_observe_interval(),
            context_missing_window_ms: default_context_missing_window(),
            context_wait_ms: default_context_wait(),
            context_poll_ms: default_context_poll(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn observe_interval(&self) -> Duration {
        Duration::from_millis(self.observe_interval_ms)
    }

    pub fn context_wait(&self) -> Duration {
        Duration::from_millis(self.context_wait_ms)
    }

    pub fn context_poll(&self) -> Duration {
        Duration::from_millis(self.context_poll_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("tracker.tick_interval_ms", self.tick_interval_ms),
            ("tracker.max_tick_delta_ms", self.max_tick_delta_ms),
            ("tracker.poll_interval_ms", self.poll_interval_ms),
            ("tracker.observe_interval_ms", self.observe_interval_ms),
            ("tracker.context_poll_ms", self.context_poll_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.tick_interval_ms > self.max_tick_delta_ms {
            return Err(Error::Config(
                "tracker.tick_interval_ms must not exceed tracker.max_tick_delta_ms".to_string(),
            ));
        }
        if self.max_tick_delta_ms > MAX_WATCH_MS_DELTA as u64 {
            return Err(Error::Config(format!(
                "tracker.max_tick_delta_ms must not exceed {}",
                MAX_WATCH_MS_DELTA
            )));
        }
        Ok(())
    }
}

fn default_tick_interval() -> u64 {
    10_000
}

fn default_max_tick_delta() -> u64 {
    20_000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_observe_interval() -> u64 {
    750
}

fn default_context_missing_window() -> u64 {
    30_000
}

fn default_context_wait() -> u64 {
    2_500
}

fn default_context_poll() -> u64 {
    120
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Ingest collector configuration
///
/// Events are POSTed in batches to `{endpoint}/ingest`.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Collector base URL (e.g., `http://localhost:4000`)
    #[serde(default = "default_collector_endpoint")]
    pub endpoint: String,

    /// Events per request
    #[serde(default = "default_collector_batch_size")]
    pub max_batch_size: usize,

    /// How often the dispatcher tries to flush
    #[serde(default = "default_collector_flush_interval")]
    pub flush_interval_ms: u64,

    /// Upper bound on one delivery attempt
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_collector_endpoint(),
            max_batch_size: default_collector_batch_size(),
            flush_interval_ms: default_collector_flush_interval(),
            timeout_secs: default_collector_timeout(),
        }
    }
}

impl CollectorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("collector.endpoint is required".to_string()));
        }
        if self.max_batch_size == 0 || self.max_batch_size > 500 {
            return Err(Error::Config(
                "collector.max_batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "collector.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_collector_endpoint() -> String {
    "http://localhost:4000".to_string()
}

fn default_collector_batch_size() -> usize {
    50
}

fn default_collector_flush_interval() -> u64 {
    750
}

fn default_collector_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.collector.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/watchtrail/config.toml` (~/.config/watchtrail/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("watchtrail").join("config.toml")
    }

    /// Returns the data directory path (for the installation identity)
    ///
    /// `$XDG_DATA_HOME/watchtrail/` (~/.local/share/watchtrail/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("watchtrail")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/watchtrail/` (~/.local/state/watchtrail/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("watchtrail")
    }

    /// Returns the installation identity file path
    ///
    /// `$XDG_DATA_HOME/watchtrail/client_session_id`
    pub fn identity_path() -> PathBuf {
        Self::data_dir().join("client_session_id")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
