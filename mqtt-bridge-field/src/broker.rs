//! Broker link: MQTT v5 event loop, retained replay capture.

use std::sync::Arc;
use std::time::Duration;

use fieldmq_bridge_framework::ShutdownSignal;
use fieldmq_common::{TopicPrefix, escape_bytes, retained_replay_filter};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, Publish};
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};

use crate::link::LinkReporter;
use crate::session::SessionShared;

/// Drive the MQTT event loop until the link ends or `stop` fires.
///
/// On ConnAck the link subscribes to everything under the prefix so the
/// broker replays its retained state; each replayed message is handed to the
/// reconciler. The client is never reconnected here: a lost connection ends
/// the session.
pub async fn run_broker_link(
    client: AsyncClient,
    mut eventloop: EventLoop,
    prefix: TopicPrefix,
    shared: Arc<SessionShared>,
    reporter: LinkReporter,
    mut stop: ShutdownSignal,
    stop_timeout: Duration,
) {
    reporter.connecting();

    loop {
        let event = tokio::select! {
            biased;
            _ = stop.triggered() => {
                disconnect(&client, &mut eventloop, stop_timeout).await;
                reporter.lost("stopped");
                return;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    reporter.failed(format!("broker rejected connection: {:?}", ack.code));
                    return;
                }

                let filter = retained_replay_filter(&prefix);
                tracing::info!(filter = %filter.path, "Subscribing for retained replay");
                if let Err(e) = client.subscribe_many(vec![filter]).await {
                    reporter.failed(format!("subscribe failed: {}", e));
                    return;
                }

                shared.touch_retained_activity().await;
                reporter.connected();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(&shared, publish).await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                tracing::debug!(pkid = ack.pkid, reasons = ?ack.return_codes, "Subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                reporter.lost(format!(
                    "broker sent disconnect: {:?}",
                    disconnect.reason_code
                ));
                return;
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                reporter.failed(format!("broker refused connection: {:?}", code));
                return;
            }
            Err(e) => {
                reporter.lost(e.to_string());
                return;
            }
        }
    }
}

async fn handle_publish(shared: &SessionShared, publish: Publish) {
    let topic = String::from_utf8_lossy(&publish.topic).into_owned();

    tracing::debug!(
        topic = %topic,
        payload = %escape_bytes(&publish.payload),
        retained = publish.retain,
        "Broker message"
    );

    if publish.retain {
        shared.record_retained(topic, publish.payload.to_vec()).await;
    }
}

/// Send DISCONNECT and keep the event loop turning until it is flushed.
///
/// Queuing the request counts against `timeout` too: with a full request
/// channel and no one polling, it would otherwise wait forever.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop, timeout: Duration) {
    let flushed = tokio::time::timeout(timeout, async {
        if let Err(e) = client.disconnect().await {
            tracing::debug!(error = %e, "Disconnect request not queued");
            return;
        }
        while eventloop.poll().await.is_ok() {}
    })
    .await;

    if flushed.is_err() {
        tracing::warn!(timeout_secs = timeout.as_secs(), "Broker did not close in time");
    }
}
