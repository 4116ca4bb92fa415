//! Configuration system for the carlink client
//!
//! Every section has defaults matching a local development broker, so an
//! empty file (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub feed: FeedSection,
}

/// Broker section
///
/// Virtual host and credentials are fixed (`/`, `guest`) and deliberately not
/// configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Use TLS (`wss://` relay, `amqps://` native)
    #[serde(default)]
    pub secure: bool,
    /// Override for the native AMQP port (default 5672, or 5671 when secure)
    pub amqp_port: Option<u16>,
    /// Fixed delay between reconnection attempts in milliseconds (default: 5000)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_reconnect_delay() -> u64 {
    5000
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            secure: false,
            amqp_port: None,
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl BrokerSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Simulated car section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSection {
    /// Publish interval in milliseconds (default: 5000)
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Starting latitude in degrees
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    /// Starting longitude in degrees
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    /// Starting battery level in percent
    #[serde(default = "default_battery")]
    pub battery: f64,
    /// Optional RNG seed for reproducible runs
    pub seed: Option<u64>,
}

fn default_interval() -> u64 {
    5000
}

fn default_latitude() -> f64 {
    59.33
}

fn default_longitude() -> f64 {
    18.07
}

fn default_battery() -> f64 {
    95.0
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            latitude: default_latitude(),
            longitude: default_longitude(),
            battery: default_battery(),
            seed: None,
        }
    }
}

impl SimulationSection {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Notification HTTP API section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    /// Base URL, requests are made against `{base_url}/health`, `{base_url}/v1/...`
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Request timeout in milliseconds (default: 10000)
    #[serde(default = "default_api_timeout")]
    pub timeout_ms: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_api_timeout() -> u64 {
    10_000
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_ms: default_api_timeout(),
        }
    }
}

impl ApiSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Merged notification view section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedSection {
    /// Number of most recent notifications kept (default: 50)
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,
}

fn default_feed_capacity() -> usize {
    50
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            capacity: default_feed_capacity(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges across all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host must not be empty"));
        }
        if self.broker.reconnect_delay_ms == 0 {
            return Err(invalid("broker.reconnect_delay_ms must be greater than 0"));
        }
        if self.simulation.interval_ms == 0 {
            return Err(invalid("simulation.interval_ms must be greater than 0"));
        }
        if !(-90.0..=90.0).contains(&self.simulation.latitude) {
            return Err(invalid("simulation.latitude must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.simulation.longitude) {
            return Err(invalid("simulation.longitude must be within [-180, 180]"));
        }
        if !(0.0..=100.0).contains(&self.simulation.battery) {
            return Err(invalid("simulation.battery must be within [0, 100]"));
        }
        if self.api.timeout_ms == 0 {
            return Err(invalid("api.timeout_ms must be greater than 0"));
        }
        if let Err(e) = Url::parse(&self.api.base_url) {
            return Err(invalid(&format!(
                "api.base_url '{}' is not a valid URL: {e}",
                self.api.base_url
            )));
        }
        if self.feed.capacity == 0 {
            return Err(invalid("feed.capacity must be greater than 0"));
        }
        Ok(())
    }

    /// Create a test configuration with short timings for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "localhost"
reconnect_delay_ms = 50

[simulation]
interval_ms = 100
seed = 7
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}
