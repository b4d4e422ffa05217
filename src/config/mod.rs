//! # Configuration Management Module
//!
//! Service configuration loaded from a TOML file. The Wavelog sync settings
//! themselves (key, endpoint, delay) are not here: they live in the radio's
//! parameter database so the web UI can change them at runtime.
//!
//! ## Configuration Structure
//!
//! - [`ServerConfig`] - listen address and database path
//! - [`SyncSettings`] - which sync source runs and how it talks to Wavelog
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! db_path = "/mnt/params.db"
//!
//! [sync]
//! source = "log_tail"
//! log_path = "/mnt/FT8/log.adi"
//! timeout_seconds = 10
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Values given on the command line take precedence: CLI args > Config file > Defaults

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::sync::client::DEFAULT_TIMEOUT_SECS;
use crate::sync::source::DEFAULT_RADIO_NAME;
use crate::sync::SyncSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite parameter database shared with the radio GUI.
    pub db_path: String,
}

/// Which state is pushed to Wavelog. Only one runs per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncSourceKind {
    /// Live frequency/mode/power.
    #[default]
    RadioState,
    /// New ADIF records appended to `log_path`.
    LogTail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub source: SyncSourceKind,
    /// ADIF log to tail; required when `source = "log_tail"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    /// Reported as `radio` in radio-state payloads.
    #[serde(default = "default_radio_name")]
    pub radio_name: String,
    /// Upload timeout in seconds (clamped to 1..=15).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_radio_name() -> String {
    DEFAULT_RADIO_NAME.to_string()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            source: SyncSourceKind::RadioState,
            log_path: None,
            radio_name: default_radio_name(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl SyncSettings {
    /// Construct the configured source. Call [`Config::validate`] first.
    pub fn build_source(&self) -> Result<SyncSource> {
        match self.source {
            SyncSourceKind::RadioState => Ok(SyncSource::radio_state(self.radio_name.clone())),
            SyncSourceKind::LogTail => {
                let path = self
                    .log_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("sync.log_path is required for the log_tail source"))?;
                Ok(SyncSource::log_tail(path))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// True when `err` from [`Config::load`] means the file does not exist, as
    /// opposed to a file that exists but cannot be parsed or validated.
    pub fn is_missing_file(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        })
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
        if self.server.host.trim().is_empty() {
            return Err(anyhow!("server.host must not be empty"));
        }
        if self.sync.source == SyncSourceKind::LogTail
            && self.sync.log_path.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(anyhow!("sync.log_path is required for the log_tail source"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 8080,
                db_path: "/mnt/params.db".to_string(),
            },
            sync: SyncSettings::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}
