//! Field bridge configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use fieldmq_bridge_framework::{BridgeConfig, BridgeError, RestartConfig};
use fieldmq_common::{BrokerConfig, LoggingConfig, TopicPrefix};

/// Complete field bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldBridgeConfig {
    /// MQTT broker settings.
    pub broker: BrokerConfig,

    /// Field-device connection settings.
    pub device: DeviceConfig,

    /// Prefix for every forwarded topic; also defines the replay subscription.
    pub topic_prefix: TopicPrefix,

    /// Session timing and restart settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Field-device connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device hostname or IP address.
    pub host: String,

    /// Device TCP port.
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// A read that delivers nothing for this long ends the session.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Size of a single socket read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Upper bound on unconsumed bytes held by the frame decoder.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_device_port() -> u16 {
    18000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    40
}

fn default_read_chunk_size() -> usize {
    1024
}

fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            read_chunk_size: default_read_chunk_size(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }

    /// `host:port` for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Both links must be connected within this many seconds.
    #[serde(default = "default_connect_window_secs")]
    pub connect_window_secs: u64,

    /// Both links must have been up this long before the sweep may run.
    #[serde(default = "default_stable_grace_secs")]
    pub stable_grace_secs: u64,

    /// Retained traffic must have been quiet this long before the sweep may run.
    #[serde(default = "default_retained_quiet_secs")]
    pub retained_quiet_secs: u64,

    /// How often sweep eligibility is checked, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// How long to wait for links to stop at teardown before aborting them.
    #[serde(default = "default_link_stop_timeout_secs")]
    pub link_stop_timeout_secs: u64,

    /// Delay policy between sessions.
    #[serde(default)]
    pub restart: RestartConfig,
}

fn default_connect_window_secs() -> u64 {
    120
}

fn default_stable_grace_secs() -> u64 {
    20
}

fn default_retained_quiet_secs() -> u64 {
    5
}

fn default_sweep_interval_ms() -> u64 {
    100
}

fn default_link_stop_timeout_secs() -> u64 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_window_secs: default_connect_window_secs(),
            stable_grace_secs: default_stable_grace_secs(),
            retained_quiet_secs: default_retained_quiet_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            link_stop_timeout_secs: default_link_stop_timeout_secs(),
            restart: RestartConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn connect_window(&self) -> Duration {
        Duration::from_secs(self.connect_window_secs)
    }

    pub fn stable_grace(&self) -> Duration {
        Duration::from_secs(self.stable_grace_secs)
    }

    pub fn retained_quiet(&self) -> Duration {
        Duration::from_secs(self.retained_quiet_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn link_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.link_stop_timeout_secs)
    }
}

impl FieldBridgeConfig {
    /// Validate the bridge-specific sections.
    pub fn validate_config(&self) -> anyhow::Result<()> {
        if self.device.host.is_empty() {
            anyhow::bail!("device host must not be empty");
        }
        if self.device.port == 0 {
            anyhow::bail!("device port must not be 0");
        }
        if self.device.read_timeout_secs == 0 {
            anyhow::bail!("device read_timeout_secs must be greater than 0");
        }
        if self.device.read_chunk_size == 0 {
            anyhow::bail!("device read_chunk_size must be greater than 0");
        }
        if self.device.max_buffer_bytes < self.device.read_chunk_size {
            anyhow::bail!(
                "device max_buffer_bytes ({}) must be at least read_chunk_size ({})",
                self.device.max_buffer_bytes,
                self.device.read_chunk_size
            );
        }
        if self.session.connect_window_secs == 0 {
            anyhow::bail!("session connect_window_secs must be greater than 0");
        }
        if self.session.sweep_interval_ms == 0 {
            anyhow::bail!("session sweep_interval_ms must be greater than 0");
        }

        Ok(())
    }
}

impl BridgeConfig for FieldBridgeConfig {
    fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn topic_prefix(&self) -> &TopicPrefix {
        &self.topic_prefix
    }

    fn validate(&self) -> fieldmq_bridge_framework::Result<()> {
        self.broker.validate()?;
        self.validate_config()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }
}
