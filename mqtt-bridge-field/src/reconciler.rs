//! Retained-state reconciliation between the device and the broker.
//!
//! On (re)connect the device restates its whole state as retained frames and
//! the broker replays every retained message under the prefix. The
//! reconciler forwards only what changed, and once both sides have settled
//! reports the broker topics the device no longer knows about.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use fieldmq_bridge_framework::ForwardRequest;
use fieldmq_common::{Update, escape_bytes};
use tokio::time::Instant;

/// What to do with one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Forward(ForwardRequest),
    Suppress,
}

/// Quiet periods gating the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTiming {
    /// Both links must have been connected at least this long.
    pub stable_grace: Duration,
    /// No retained traffic from either side for at least this long.
    pub retained_quiet: Duration,
}

impl Default for SweepTiming {
    fn default() -> Self {
        Self {
            stable_grace: Duration::from_secs(20),
            retained_quiet: Duration::from_secs(5),
        }
    }
}

/// When each link last became connected; `None` while it is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkClock {
    pub device_since: Option<Instant>,
    pub broker_since: Option<Instant>,
}

/// A broker retained topic the device did not report this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleTopic {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Per-session reconciliation state.
#[derive(Debug)]
pub struct Reconciler {
    /// Broker retained values not yet confirmed or replaced by the device.
    retained: HashMap<String, Vec<u8>>,
    /// Every topic the device reported this session.
    reported: HashSet<String>,
    last_retained_activity: Instant,
    timing: SweepTiming,
}

impl Reconciler {
    pub fn new(timing: SweepTiming, now: Instant) -> Self {
        Self {
            retained: HashMap::new(),
            reported: HashSet::new(),
            last_retained_activity: now,
            timing,
        }
    }

    /// Decide whether `update` must reach the broker.
    pub fn handle(&mut self, update: Update, now: Instant) -> Decision {
        let Update {
            topic,
            value,
            retained,
        } = update;

        self.reported.insert(topic.clone());

        if !retained {
            self.retained.remove(&topic);
            tracing::debug!(topic = %topic, value = %value, "Forwarding live update");
            return Decision::Forward(ForwardRequest::new(topic, value));
        }

        self.last_retained_activity = now;

        match self.retained.get(&topic) {
            Some(cached) if value.matches_wire(cached) => {
                tracing::debug!(topic = %topic, value = %value, "Suppressing unchanged retained update");
                Decision::Suppress
            }
            Some(_) => {
                self.retained.remove(&topic);
                tracing::debug!(topic = %topic, value = %value, "Forwarding changed retained update");
                Decision::Forward(ForwardRequest::new(topic, value))
            }
            None => {
                tracing::debug!(topic = %topic, value = %value, "Forwarding new retained update");
                Decision::Forward(ForwardRequest::new(topic, value))
            }
        }
    }

    /// Remember a retained message replayed by the broker.
    pub fn record_retained(&mut self, topic: impl Into<String>, payload: Vec<u8>, now: Instant) {
        self.retained.insert(topic.into(), payload);
        self.last_retained_activity = now;
    }

    /// Restart the retained quiet period without caching anything.
    pub fn touch_retained_activity(&mut self, now: Instant) {
        self.last_retained_activity = now;
    }

    /// Broker values still waiting for the device to confirm or replace them.
    pub fn cached(&self) -> usize {
        self.retained.len()
    }

    pub fn is_cached(&self, topic: &str) -> bool {
        self.retained.contains_key(topic)
    }

    /// Whether the sweep may run now.
    pub fn sweep_due(&self, now: Instant, links: LinkClock) -> bool {
        if self.retained.is_empty() {
            return false;
        }

        let (Some(device_since), Some(broker_since)) = (links.device_since, links.broker_since)
        else {
            return false;
        };

        let grace = self.timing.stable_grace;
        now.saturating_duration_since(device_since) >= grace
            && now.saturating_duration_since(broker_since) >= grace
            && now.saturating_duration_since(self.last_retained_activity) >= self.timing.retained_quiet
    }

    /// Take the cache and report the topics the device never mentioned.
    ///
    /// Returns `None` while not due. The cache is emptied so each replay is
    /// swept once. Nothing is sent to the broker; the result is advisory.
    pub fn sweep(&mut self, now: Instant, links: LinkClock) -> Option<Vec<StaleTopic>> {
        if !self.sweep_due(now, links) {
            return None;
        }

        let mut stale: Vec<StaleTopic> = self
            .retained
            .drain()
            .filter(|(topic, _)| !self.reported.contains(topic))
            .map(|(topic, payload)| StaleTopic { topic, payload })
            .collect();
        stale.sort_by(|a, b| a.topic.cmp(&b.topic));

        for entry in &stale {
            tracing::info!(
                topic = %entry.topic,
                payload = %escape_bytes(&entry.payload),
                "Recommend deleting retained topic no longer reported by the device"
            );
        }

        Some(stale)
    }
}
