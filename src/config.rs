//! Application configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::ScanAlertError;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub history: HistoryConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Server origin, `http(s)` or `ws(s)`
    pub url: String,
    /// Socket.IO mount path
    pub path: String,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub reconnect_delay_min: Duration,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub reconnect_delay_max: Duration,
}

/// Credentials of the parent session, when running the watch side
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    pub token: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Page size of the child detail view
    pub limit: u32,
    /// Page size of the map view
    pub map_limit: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with("config/default")
    }

    /// Load configuration from an optional file (any supported extension)
    /// followed by `SCANALERTS__*` environment variables.
    pub fn load_with(file_stem: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("api.base_url", DEFAULT_SERVER_URL)?
            .set_default("api.timeout", 15)?
            .set_default("channel.url", DEFAULT_SERVER_URL)?
            .set_default("channel.path", "/socket.io")?
            .set_default("channel.reconnect_delay_min", 1000)?
            .set_default("channel.reconnect_delay_max", 5000)?
            .set_default("history.limit", 20)?
            .set_default("history.map_limit", 100)?
            .add_source(File::with_name(file_stem).required(false))
            .add_source(
                Environment::with_prefix("SCANALERTS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ScanAlertError> {
        self.api.validate()?;
        self.channel.validate()?;
        self.history.validate()?;
        Ok(())
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ScanAlertError> {
        validate_url(&self.base_url, &["http", "https"])?;
        if self.timeout.is_zero() {
            return Err(ScanAlertError::ConfigurationError {
                message: "API timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ScanAlertError> {
        validate_url(&self.url, &["http", "https", "ws", "wss"])?;
        if !self.path.starts_with('/') {
            return Err(ScanAlertError::ConfigurationError {
                message: format!("Channel path must start with '/': {}", self.path),
            });
        }
        if self.reconnect_delay_min.is_zero() {
            return Err(ScanAlertError::ConfigurationError {
                message: "Reconnect delay must be greater than zero".to_string(),
            });
        }
        if self.reconnect_delay_min > self.reconnect_delay_max {
            return Err(ScanAlertError::ConfigurationError {
                message: "Minimum reconnect delay exceeds maximum".to_string(),
            });
        }
        Ok(())
    }
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ScanAlertError> {
        if self.limit == 0 || self.map_limit == 0 {
            return Err(ScanAlertError::ConfigurationError {
                message: "History limits must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_url(value: &str, schemes: &[&str]) -> Result<(), ScanAlertError> {
    let url = Url::parse(value).map_err(|e| ScanAlertError::ConfigurationError {
        message: format!("Invalid URL {}: {}", value, e),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ScanAlertError::ConfigurationError {
            message: format!("Unsupported URL scheme: {}", url.scheme()),
        });
    }
    Ok(())
}
