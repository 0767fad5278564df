//! fieldmq Common Library
//!
//! This crate provides shared types and utilities for fieldmq telemetry bridges:
//!
//! - [`value`] - Decoded payloads and updates (`Value`, `Update`)
//! - [`topic`] - Topic prefix handling and wildcard sanitising
//! - [`config`] - Broker and logging configuration (JSON5 format)
//! - [`session`] - MQTT client construction
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod session;
pub mod topic;
pub mod value;

// Re-export commonly used types at the crate root
pub use config::{BrokerConfig, LogFormat, LoggingConfig, parse_config};
pub use error::{Error, Result};
pub use session::{connect, qos_from_level, retained_replay_filter};
pub use topic::TopicPrefix;
pub use value::{EMPTY_PAYLOAD_MARKER, Update, Value, escape_bytes};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use fieldmq_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
