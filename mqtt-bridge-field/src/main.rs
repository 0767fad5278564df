//! MQTT bridge for field-device line telemetry.
//!
//! Bridges a field device's TCP line protocol to retained MQTT topics,
//! restarting the whole session whenever either side drops.

use anyhow::Result;
use fieldmq_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use mqtt_bridge_field::{FieldBridgeConfig, run_session};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("field.json5");

    // Load configuration
    let config = FieldBridgeConfig::load(&args.config)?;
    let restart = config.session.restart;

    let runner = BridgeRunner::new_with_args("field", config, Some(&args))?
        .with_restart_policy(restart.build());

    tracing::info!(
        device = %runner.config().device.address(),
        broker = %format!("{}:{}", runner.config().broker.host, runner.config().broker.port),
        prefix = %runner.config().topic_prefix,
        "Field bridge configured"
    );

    runner
        .run(|config, ctx| run_session(config.clone(), ctx))
        .await?;

    Ok(())
}
