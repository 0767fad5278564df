use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname or IP address.
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication (only used together with `username`).
    #[serde(default)]
    pub password: Option<String>,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// QoS used for forwarded publishes: 0, 1 or 2.
    #[serde(default)]
    pub qos: u8,

    /// Capacity of the client request channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fieldmq-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

impl BrokerConfig {
    /// Create a configuration for `host:port` with all other fields defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            qos: 0,
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Check the fields that the MQTT client would otherwise reject at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("broker host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("broker port must not be 0".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        if self.qos > 2 {
            return Err(Error::Config(format!(
                "Invalid QoS {}. Expected 0, 1 or 2",
                self.qos
            )));
        }
        if self.keep_alive_secs < 5 {
            return Err(Error::Config(
                "keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_config() {
        let json5 = r#"
        {
            host: "192.168.1.10",
            port: 8883,
            username: "bridge",
            password: "secret",
            qos: 1,
        }
        "#;

        let config: BrokerConfig = parse_config(json5).unwrap();

        assert_eq!(config.host, "192.168.1.10");
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("bridge"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.qos, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_defaults() {
        let config: BrokerConfig = parse_config(r#"{ host: "localhost" }"#).unwrap();

        assert_eq!(config, BrokerConfig::new("localhost", 1883));
        assert_eq!(config.client_id, "fieldmq-bridge");
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.qos, 0);
    }

    #[test]
    fn test_broker_validation() {
        let mut config = BrokerConfig::new("localhost", 1883);
        config.qos = 3;
        assert!(config.validate().is_err());

        let config = BrokerConfig::new("", 1883);
        assert!(config.validate().is_err());

        let config = BrokerConfig::new("localhost", 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            level: "debug",
            format: "json",
        }
        "#;

        let config: LoggingConfig = parse_config(json5).unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_default_logging() {
        let config: LoggingConfig = parse_config("{}").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
    }
}
