//! Ordered forwarding queue between the reconciler and the broker.
//!
//! The queue is single-consumer and strictly FIFO. Requests for the same
//! topic are never coalesced; the broker keeps whichever arrives last.

use fieldmq_common::Value;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::publisher::RetainedSink;

/// A value the reconciler decided the broker must receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub topic: String,
    pub value: Value,
}

impl ForwardRequest {
    pub fn new(topic: impl Into<String>, value: Value) -> Self {
        Self {
            topic: topic.into(),
            value,
        }
    }
}

/// Create a connected queue/receiver pair.
pub fn forward_queue() -> (ForwardQueue, ForwardReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ForwardQueue { tx }, ForwardReceiver { rx })
}

/// Producer side, held by whoever runs the reconciler.
#[derive(Debug, Clone)]
pub struct ForwardQueue {
    tx: mpsc::UnboundedSender<ForwardRequest>,
}

impl ForwardQueue {
    /// Append a request. Fails only once the receiver is gone.
    pub fn push(&self, request: ForwardRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|e| BridgeError::worker(format!("forward queue closed, dropped {}", e.0.topic)))
    }
}

/// Consumer side, drained by the single publisher.
#[derive(Debug)]
pub struct ForwardReceiver {
    rx: mpsc::UnboundedReceiver<ForwardRequest>,
}

impl ForwardReceiver {
    /// Wait for the next request. `None` once every producer is dropped.
    pub async fn recv(&mut self) -> Option<ForwardRequest> {
        self.rx.recv().await
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Publish one request as a retained message.
pub async fn publish<S: RetainedSink>(sink: &S, request: &ForwardRequest) -> Result<()> {
    sink.publish_retained(&request.topic, request.value.to_wire())
        .await?;

    tracing::debug!(topic = %request.topic, value = %request.value, "Published retained");
    Ok(())
}
