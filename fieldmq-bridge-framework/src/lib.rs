//! fieldmq Bridge Framework
//!
//! Common abstractions for building bridges that forward device telemetry to
//! an MQTT broker as retained state.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for supervising sessions (startup, restart, signal handling)
//! - [`Publisher`] for retained publishes to the broker
//! - [`ForwardQueue`] / [`ForwardReceiver`] for the ordered publish pipeline
//! - [`RestartPolicy`] implementations for the delay between sessions
//! - [`SessionStats`] for per-session counters
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use fieldmq_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, SessionEnd};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     // Each session builds its own links and state
//!     runner
//!         .run(|config, ctx| my_session(config.clone(), ctx))
//!         .await?;
//!     Ok(())
//! }
//! ```

mod args;
mod backoff;
mod config;
mod error;
mod pipeline;
mod publisher;
mod runner;
mod stats;

pub use args::BridgeArgs;
pub use backoff::{ExponentialBackoff, FixedDelay, RestartConfig, RestartPolicy};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use pipeline::{ForwardQueue, ForwardReceiver, ForwardRequest, forward_queue, publish};
pub use publisher::{Publisher, RetainedSink};
pub use runner::{
    BridgeRunner, SessionContext, SessionEnd, ShutdownSignal, ShutdownTrigger, shutdown_channel,
};
pub use stats::{SessionStats, StatsSnapshot};

// Re-export commonly used types from fieldmq-common
pub use fieldmq_common::{BrokerConfig, LogFormat, LoggingConfig, TopicPrefix, Update, Value};
