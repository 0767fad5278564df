//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{BrokerConfig, LoggingConfig, TopicPrefix};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use fieldmq_bridge_framework::{BridgeConfig, BrokerConfig, LoggingConfig, TopicPrefix};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub broker: BrokerConfig,
///     pub logging: LoggingConfig,
///     pub topic_prefix: TopicPrefix,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn broker(&self) -> &BrokerConfig {
///         &self.broker
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn topic_prefix(&self) -> &TopicPrefix {
///         &self.topic_prefix
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the MQTT broker configuration.
    fn broker(&self) -> &BrokerConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the topic prefix for this bridge.
    fn topic_prefix(&self) -> &TopicPrefix;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. The default checks the broker
    /// section; override to add bridge-specific checks.
    fn validate(&self) -> Result<()> {
        self.broker().validate()?;
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;

        config.validate()?;

        Ok(config)
    }
}
