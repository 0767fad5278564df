//! MQTT bridge for field-device line telemetry.
//!
//! The bridge holds one TCP connection to a field device and one MQTT v5
//! connection to a broker. Frames read from the device are decoded into
//! updates, reconciled against the retained state the broker replays on
//! subscribe, and forwarded as retained publishes.
//!
//! # Topic Format
//!
//! Device topic names are published under a fixed prefix:
//! ```text
//! {prefix}{device topic}
//! ```
//!
//! For example:
//! ```text
//! crestron/light1
//! crestron/room/kitchen/level
//! ```
//!
//! Wildcard characters in device names are replaced with `$`.

pub mod broker;
pub mod config;
pub mod decoder;
pub mod device;
pub mod link;
pub mod reconciler;
pub mod session;

pub use config::{DeviceConfig, FieldBridgeConfig, SessionConfig};
pub use decoder::{DecodeError, Decoded, FrameDecoder};
pub use link::ConnectionState;
pub use reconciler::{Decision, LinkClock, Reconciler, StaleTopic, SweepTiming};
pub use session::{SessionShared, run_session};
