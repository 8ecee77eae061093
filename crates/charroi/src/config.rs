//! Configuration management for charroi.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::AckMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "charroi";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "pending.db";

/// Longest sync lease a configuration may ask for (one week).
pub const MAX_LEASE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CHARROI_`, sections split on `__`)
/// 2. TOML config file at `~/.config/charroi/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Remote server configuration.
    pub server: ServerConfig,
    /// Sync runner configuration.
    pub sync: SyncConfig,
    /// Connectivity monitor configuration.
    pub connectivity: ConnectivityConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/charroi/pending.db`
    pub database_path: Option<PathBuf>,
}

/// Remote server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server domain, e.g. `https://charroi.example.com`.
    pub url: String,
    /// Path of the validation endpoint below `/api/charroi/`.
    pub validation_path: String,
    /// Timeout for a single submission in seconds.
    pub request_timeout_secs: u64,
    /// Optional bearer token sent with every submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Sync runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When a submitted entry is removed from the queue.
    pub ack_mode: AckMode,
    /// Failures after which an entry is dead-lettered.
    /// Set to 0 to never skip a failing entry.
    pub max_attempts: u32,
    /// Seconds a sync lease is honoured before another process may take it.
    pub lease_ttl_secs: u64,
}

/// Connectivity monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// URL probed to decide whether the server is reachable.
    /// Defaults to the server url.
    pub probe_url: Option<String>,
    /// Interval between probes in milliseconds.
    pub poll_interval_ms: u64,
    /// Timeout for a single probe in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8070".to_string(),
            validation_path: "validation_demande".to_string(),
            request_timeout_secs: 30,
            auth_token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::default(),
            max_attempts: 0,
            lease_ttl_secs: 600,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            poll_interval_ms: 5_000,
            probe_timeout_ms: 3_000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CHARROI_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CHARROI_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        validate_http_url("server.url", &self.server.url)?;

        if self.server.validation_path.trim_matches('/').is_empty() {
            return Err(Error::ConfigValidation {
                message: "server.validation_path must not be empty".to_string(),
            });
        }

        if self.server.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "server.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.lease_ttl_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.lease_ttl_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.lease_ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(Error::ConfigValidation {
                message: format!("sync.lease_ttl_secs must be at most {MAX_LEASE_TTL_SECS}"),
            });
        }

        if let Some(probe_url) = &self.connectivity.probe_url {
            validate_http_url("connectivity.probe_url", probe_url)?;
        }

        if self.connectivity.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "connectivity.poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.connectivity.probe_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "connectivity.probe_timeout_ms must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Full URL of the validation endpoint.
    #[must_use]
    pub fn validation_url(&self) -> String {
        format!(
            "{}/api/charroi/{}",
            self.server.url.trim_end_matches('/'),
            self.server.validation_path.trim_matches('/')
        )
    }

    /// URL probed by the connectivity monitor.
    #[must_use]
    pub fn probe_url(&self) -> String {
        self.connectivity
            .probe_url
            .clone()
            .unwrap_or_else(|| self.server.url.clone())
    }

    /// Get the submission timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the probe interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.poll_interval_ms)
    }

    /// Get the probe timeout as a Duration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(value).map_err(|e| Error::ConfigValidation {
        message: format!("{field} is not a valid url ({value}): {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::ConfigValidation {
            message: format!("{field} must use http or https, got {other}"),
        }),
    }
}
