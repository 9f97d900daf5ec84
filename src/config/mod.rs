//! # Configuration Management Module
//!
//! Process-level settings for the bridge, read from `config.toml`. Server
//! connection settings are not here; they live in `<data_dir>/servers.json`
//! (see [`crate::registry`]).
//!
//! ## Configuration Structure
//!
//! - [`BridgeConfig`] - data directory
//! - [`GatewaySettings`] - worker lanes and outer timeout grace
//! - [`ScannerConfig`] - roster scan interval, per-query timeout and command
//! - [`AutosaveConfig`] - autosave interval and snapshot retention
//! - [`HeartbeatConfig`] - heartbeat interval and latency warning threshold
//! - [`LoggingConfig`] - log level and optional log file
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rconbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("data dir: {}", config.bridge.data_dir);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bridge]
//! data_dir = "./data"
//!
//! [gateway]
//! workers_per_server = 2
//! outer_grace_ms = 1000
//!
//! [scanner]
//! interval_secs = 120
//! query_timeout_ms = 5000
//!
//! [autosave]
//! interval_secs = 900
//! snapshot_retention = 96
//!
//! [heartbeat]
//! interval_secs = 300
//! latency_warn_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::gateway::GatewayConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub gateway: GatewaySettings,
    pub scanner: ScannerConfig,
    pub autosave: AutosaveConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub data_dir: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Concurrent blocking calls allowed per server.
    pub workers_per_server: usize,
    /// Added to each server's `connection_timeout` to form the outer deadline.
    pub outer_grace_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            workers_per_server: 2,
            outer_grace_ms: 1000,
        }
    }
}

impl GatewaySettings {
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            workers_per_server: self.workers_per_server,
            outer_grace: Duration::from_millis(self.outer_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Per-server roster query timeout; must be shorter than the interval.
    pub query_timeout_ms: u64,
    pub roster_command: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            query_timeout_ms: 5000,
            roster_command: "ListPlayers".to_string(),
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Snapshots kept in `autosave/`; 0 keeps all.
    pub snapshot_retention: usize,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            snapshot_retention: 96,
        }
    }
}

impl AutosaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Average gateway latency above this is logged as a warning.
    pub latency_warn_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            latency_warn_ms: 1000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.to_ascii_lowercase().as_str() {
            "error" => log::LevelFilter::Error,
            "warn" | "warning" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            "off" => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.data_dir.trim().is_empty() {
            return Err(anyhow!("bridge.data_dir must not be empty"));
        }
        if self.gateway.workers_per_server == 0 {
            return Err(anyhow!("gateway.workers_per_server must be at least 1"));
        }
        for (name, secs) in [
            ("scanner.interval_secs", self.scanner.interval_secs),
            ("autosave.interval_secs", self.autosave.interval_secs),
            ("heartbeat.interval_secs", self.heartbeat.interval_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.scanner.query_timeout_ms == 0 {
            return Err(anyhow!("scanner.query_timeout_ms must be greater than zero"));
        }
        if self.scanner.query_timeout() >= self.scanner.interval() {
            return Err(anyhow!(
                "scanner.query_timeout_ms ({}) must be shorter than scanner.interval_secs ({}s)",
                self.scanner.query_timeout_ms,
                self.scanner.interval_secs
            ));
        }
        if self.scanner.roster_command.trim().is_empty() {
            return Err(anyhow!("scanner.roster_command must not be empty"));
        }
        Ok(())
    }
}
