//! Configuration surface for the control-unit node
//!
//! Consumed, not produced, by the core: model directory, registration
//! endpoint, optional distribution sink, and the monitoring queue capacity.
//! A missing config file falls back to defaults; a file that exists but does
//! not parse or validate is a fatal startup error.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Transport protocol selected per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Mqtt,
    Http,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    /// Case-insensitive match against `{MQTT, HTTP}`; anything else is a
    /// fatal configuration error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Protocol::Mqtt),
            "http" => Ok(Protocol::Http),
            other => Err(ConfigError::ValidationError(format!(
                "unknown protocol '{}', expected MQTT or HTTP",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Mqtt => f.write_str("MQTT"),
            Protocol::Http => f.write_str("HTTP"),
        }
    }
}

/// Where entity models are persisted and loaded from
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory scanned at startup and used to persist received models
    pub directory: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("models"),
        }
    }
}

/// Endpoint on which raw model text is received
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// `MQTT` or `HTTP`, case-insensitive
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// MQTT topic or HTTP context path
    pub channel: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            protocol: "mqtt".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1883,
            channel: "registration".to_string(),
        }
    }
}

/// Downstream sink for aggregation results; absent means no distribution
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    /// `MQTT` or `HTTP`, case-insensitive
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// MQTT topic or HTTP context path
    pub channel: String,
}

/// Capacity of the monitoring fan-out queue
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Full node configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub registration: RegistrationConfig,
    pub distribution: Option<DistributionConfig>,
    pub queue: QueueConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a later startup step would otherwise trip over
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registration.protocol.parse::<Protocol>()?;
        if let Some(ref distribution) = self.distribution {
            distribution.protocol.parse::<Protocol>()?;
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.registration.channel.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "registration channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_is_case_insensitive() {
        assert_eq!("mqtt".parse::<Protocol>().unwrap(), Protocol::Mqtt);
        assert_eq!("MQTT".parse::<Protocol>().unwrap(), Protocol::Mqtt);
        assert_eq!("Http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert!("amqp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.models.directory, PathBuf::from("models"));
        assert_eq!(config.registration.port, 1883);
        assert!(config.distribution.is_none());
        assert_eq!(config.queue.capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_parses() {
        let text = r#"
[models]
directory = "/var/lib/hubnode/models"

[registration]
protocol = "HTTP"
host = "0.0.0.0"
port = 8080
channel = "register"

[distribution]
protocol = "mqtt"
host = "broker.local"
port = 1883
channel = "aggregate"

[queue]
capacity = 256
"#;
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.registration.protocol.parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!(config.distribution.as_ref().unwrap().channel, "aggregate");
        assert_eq!(config.queue.capacity, 256);
    }

    #[test]
    fn test_invalid_protocol_is_fatal() {
        let text = r#"
[registration]
protocol = "carrier-pigeon"
host = "h"
port = 1
channel = "c"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_capacity_is_fatal() {
        let text = "[queue]\ncapacity = 0\n";
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }
}
