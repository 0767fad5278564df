//! Retained publisher for MQTT.

use std::future::Future;

use rumqttc::v5::AsyncClient;
use rumqttc::v5::mqttbytes::QoS;

use crate::error::{BridgeError, Result};

/// Capability to store a retained value on the broker.
///
/// [`Publisher`] is the MQTT implementation; the publish pipeline only
/// depends on this trait.
pub trait RetainedSink {
    /// Publish `payload` on `topic` with the retain flag set.
    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Publisher for sending retained values to the broker.
///
/// Wraps an MQTT client handle. Every publish is marked retained so the
/// broker always holds the last forwarded value per topic.
#[derive(Clone, Debug)]
pub struct Publisher {
    client: AsyncClient,
    qos: QoS,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

impl RetainedSink for Publisher {
    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, self.qos, true, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}
