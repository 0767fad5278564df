//! One bridge session: both links, the reconciler and the publish loop.
//!
//! Everything here is built fresh by [`run_session`] and dropped when it
//! returns; the runner starts the next session from nothing.

use std::sync::Arc;
use std::time::Duration;

use fieldmq_bridge_framework::{
    ForwardQueue, ForwardReceiver, Publisher, RetainedSink, SessionContext, SessionEnd,
    SessionStats, ShutdownSignal, forward_queue, publish, shutdown_channel,
};
use fieldmq_common::qos_from_level;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::broker::run_broker_link;
use crate::config::{FieldBridgeConfig, SessionConfig};
use crate::decoder::Decoded;
use crate::device::run_device_link;
use crate::link::{ConnectionState, link_channel};
use crate::reconciler::{Decision, LinkClock, Reconciler, StaleTopic, SweepTiming};

/// State shared by the links and the supervisor.
///
/// The reconciliation decision and the enqueue of its forward happen under
/// the same lock, so forwards leave in the order decisions were made.
#[derive(Debug)]
pub struct SessionShared {
    reconciler: Mutex<Reconciler>,
    queue: ForwardQueue,
    stats: SessionStats,
}

impl SessionShared {
    pub fn new(reconciler: Reconciler, queue: ForwardQueue, stats: SessionStats) -> Self {
        Self {
            reconciler: Mutex::new(reconciler),
            queue,
            stats,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Reconcile decoded updates and queue whatever must be forwarded.
    pub async fn apply(&self, decoded: Decoded) -> fieldmq_bridge_framework::Result<()> {
        self.stats.record_frames(decoded.updates.len() as u64);
        self.stats.record_malformed(decoded.malformed as u64);

        if decoded.updates.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut reconciler = self.reconciler.lock().await;
        for update in decoded.updates {
            match reconciler.handle(update, now) {
                Decision::Forward(request) => {
                    self.queue.push(request)?;
                    self.stats.record_forwarded();
                }
                Decision::Suppress => self.stats.record_suppressed(),
            }
        }

        Ok(())
    }

    pub async fn record_retained(&self, topic: impl Into<String>, payload: Vec<u8>) {
        self.stats.record_broker_retained();
        self.reconciler
            .lock()
            .await
            .record_retained(topic, payload, Instant::now());
    }

    pub async fn touch_retained_activity(&self) {
        self.reconciler
            .lock()
            .await
            .touch_retained_activity(Instant::now());
    }

    pub async fn sweep(&self, now: Instant, links: LinkClock) -> Option<Vec<StaleTopic>> {
        self.reconciler.lock().await.sweep(now, links)
    }

    /// Broker retained values still cached.
    pub async fn cached(&self) -> usize {
        self.reconciler.lock().await.cached()
    }
}

/// Observers for both link states.
#[derive(Debug)]
pub struct LinkStates {
    pub device: watch::Receiver<ConnectionState>,
    pub broker: watch::Receiver<ConnectionState>,
}

impl LinkStates {
    fn clock(&self) -> LinkClock {
        LinkClock {
            device_since: self.device.borrow().connected_since(),
            broker_since: self.broker.borrow().connected_since(),
        }
    }

    /// Reason the session cannot continue, if either link is terminal.
    fn terminal(&self) -> Option<String> {
        let device = self.device.borrow();
        let broker = self.broker.borrow();
        if device.is_terminal() {
            return Some(format!("device link {}", *device));
        }
        if broker.is_terminal() {
            return Some(format!("broker link {}", *broker));
        }
        None
    }

    fn both_connected(&self) -> bool {
        self.device.borrow().is_connected() && self.broker.borrow().is_connected()
    }

    /// Wait until both links are connected, or one of them gives up.
    pub async fn wait_connected(&mut self) -> Result<(), String> {
        loop {
            let _ = self.device.borrow_and_update();
            let _ = self.broker.borrow_and_update();

            if let Some(reason) = self.terminal() {
                return Err(reason);
            }
            if self.both_connected() {
                return Ok(());
            }

            tokio::select! {
                r = self.device.changed() => if r.is_err() && !self.device.borrow().is_terminal() {
                    return Err("device link stopped".to_string());
                },
                r = self.broker.changed() => if r.is_err() && !self.broker.borrow().is_terminal() {
                    return Err("broker link stopped".to_string());
                },
            }
        }
    }
}

/// Run one session to completion.
pub async fn run_session(config: FieldBridgeConfig, ctx: SessionContext) -> SessionEnd {
    let SessionContext { run, mut shutdown } = ctx;

    let (client, eventloop) = match fieldmq_common::connect(&config.broker) {
        Ok(pair) => pair,
        Err(e) => return SessionEnd::Aborted(format!("broker client: {}", e)),
    };
    let qos = match qos_from_level(config.broker.qos) {
        Ok(qos) => qos,
        Err(e) => return SessionEnd::Aborted(e.to_string()),
    };
    let publisher = Publisher::new(client.clone(), qos);

    let (queue, mut forwards) = forward_queue();
    let timing = SweepTiming {
        stable_grace: config.session.stable_grace(),
        retained_quiet: config.session.retained_quiet(),
    };
    let shared = Arc::new(SessionShared::new(
        Reconciler::new(timing, Instant::now()),
        queue,
        SessionStats::new(run),
    ));

    let (link_stop, link_signal) = shutdown_channel();
    let (device_reporter, device_state) = link_channel("device");
    let (broker_reporter, broker_state) = link_channel("broker");
    let mut links = LinkStates {
        device: device_state,
        broker: broker_state,
    };

    let device_task = tokio::spawn(
        run_device_link(
            config.device.clone(),
            config.topic_prefix.clone(),
            shared.clone(),
            device_reporter,
            link_signal.clone(),
        )
        .in_current_span(),
    );
    let broker_task = tokio::spawn(
        run_broker_link(
            client,
            eventloop,
            config.topic_prefix.clone(),
            shared.clone(),
            broker_reporter,
            link_signal,
            config.session.link_stop_timeout(),
        )
        .in_current_span(),
    );

    let end = supervise(
        &config.session,
        &shared,
        &publisher,
        &mut links,
        &mut forwards,
        &mut shutdown,
    )
    .await;

    tracing::info!(outcome = %end, "Stopping links");
    link_stop.trigger();
    let join_timeout = config.session.link_stop_timeout() * 2;
    join_link("device", device_task, join_timeout).await;
    join_link("broker", broker_task, join_timeout).await;

    let snapshot = shared.stats().snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(stats) => tracing::info!(stats = %stats, "Session statistics"),
        Err(e) => tracing::debug!(error = %e, "Could not serialize session statistics"),
    }

    end
}

/// Wait for both links, then publish and sweep until the session ends.
pub async fn supervise<S: RetainedSink>(
    config: &SessionConfig,
    shared: &SessionShared,
    sink: &S,
    links: &mut LinkStates,
    forwards: &mut ForwardReceiver,
    shutdown: &mut ShutdownSignal,
) -> SessionEnd {
    let window = config.connect_window();
    tokio::select! {
        biased;
        _ = shutdown.triggered() => return SessionEnd::Shutdown,
        connected = tokio::time::timeout(window, links.wait_connected()) => match connected {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return SessionEnd::Aborted(reason),
            Err(_) => {
                return SessionEnd::Aborted(format!(
                    "links not connected within {}s",
                    window.as_secs()
                ));
            }
        },
    }

    tracing::info!("Both links connected, bridging");

    let mut sweep = tokio::time::interval(config.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => return SessionEnd::Shutdown,
            changed = links.device.changed() => {
                if changed.is_err() || !links.device.borrow().is_connected() {
                    return SessionEnd::Ended(format!("device link {}", *links.device.borrow()));
                }
            }
            changed = links.broker.changed() => {
                if changed.is_err() || !links.broker.borrow().is_connected() {
                    return SessionEnd::Ended(format!("broker link {}", *links.broker.borrow()));
                }
            }
            Some(request) = forwards.recv() => {
                match publish(sink, &request).await {
                    Ok(()) => shared.stats().record_published(),
                    Err(e) => {
                        shared.stats().record_publish_failed();
                        return SessionEnd::Ended(format!("publish failed: {}", e));
                    }
                }
            }
            _ = sweep.tick() => {
                if let Some(stale) = shared.sweep(Instant::now(), links.clock()).await {
                    tracing::info!(
                        stale = stale.len(),
                        "Nothing more recommended for deletion"
                    );
                }
            }
        }
    }
}

async fn join_link(name: &'static str, mut task: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => tracing::debug!(link = name, "Link stopped"),
        Ok(Err(e)) => tracing::error!(link = name, error = %e, "Link task failed"),
        Err(_) => {
            tracing::warn!(link = name, "Link did not stop in time, aborting");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameDecoder;
    use crate::link::{LinkReporter, link_channel};
    use fieldmq_bridge_framework::{BridgeError, ShutdownTrigger};
    use fieldmq_common::TopicPrefix;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        published: StdMutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl RetainedSink for RecordingSink {
        async fn publish_retained(
            &self,
            topic: &str,
            payload: Vec<u8>,
        ) -> fieldmq_bridge_framework::Result<()> {
            if self.fail {
                return Err(BridgeError::Publish {
                    topic: topic.to_string(),
                    message: "connection lost".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct Harness {
        shared: Arc<SessionShared>,
        forwards: ForwardReceiver,
        links: LinkStates,
        device: LinkReporter,
        broker: LinkReporter,
        trigger: ShutdownTrigger,
        shutdown: ShutdownSignal,
        decoder: FrameDecoder,
    }

    fn harness() -> Harness {
        let (queue, forwards) = forward_queue();
        let shared = Arc::new(SessionShared::new(
            Reconciler::new(SweepTiming::default(), Instant::now()),
            queue,
            SessionStats::new(1),
        ));
        let (device, device_state) = link_channel("device");
        let (broker, broker_state) = link_channel("broker");
        let (trigger, shutdown) = shutdown_channel();

        Harness {
            shared,
            forwards,
            links: LinkStates {
                device: device_state,
                broker: broker_state,
            },
            device,
            broker,
            trigger,
            shutdown,
            decoder: FrameDecoder::new(TopicPrefix::new("crestron/").unwrap(), 1024),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_window_elapses() {
        let mut h = harness();
        h.device.connected();
        let sink = RecordingSink::default();

        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert_eq!(
            end,
            SessionEnd::Aborted("links not connected within 120s".to_string())
        );
    }

    #[tokio::test]
    async fn test_link_failure_aborts() {
        let mut h = harness();
        h.device.connected();
        h.broker.failed("refused");
        let sink = RecordingSink::default();

        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert!(matches!(end, SessionEnd::Aborted(reason) if reason.contains("broker")));
    }

    #[tokio::test]
    async fn test_forwards_published_until_link_lost() {
        let mut h = harness();
        h.device.connected();
        h.broker.connected();
        h.shared
            .record_retained("crestron/light1".to_string(), b"5".to_vec())
            .await;

        let decoded = h
            .decoder
            .feed(b":light1=5\r\n:light2=on\r\n!light1=5\r\n")
            .unwrap();
        h.shared.apply(decoded).await.unwrap();

        let sink = RecordingSink::default();
        let device = h.device;
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            device.lost("closed by device");
        });

        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert!(matches!(end, SessionEnd::Ended(reason) if reason.contains("device")));
        let published = sink.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                ("crestron/light2".to_string(), b"on".to_vec()),
                ("crestron/light1".to_string(), b"5".to_vec()),
            ]
        );
        assert_eq!(h.shared.stats().snapshot().published, 2);
    }

    #[tokio::test]
    async fn test_publish_failure_ends_session() {
        let mut h = harness();
        h.device.connected();
        h.broker.connected();
        let decoded = h.decoder.feed(b"!light1=5\r\n").unwrap();
        h.shared.apply(decoded).await.unwrap();

        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert!(matches!(end, SessionEnd::Ended(reason) if reason.starts_with("publish failed")));
        assert_eq!(h.shared.stats().snapshot().publish_failed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_wins() {
        let mut h = harness();
        h.trigger.trigger();
        let sink = RecordingSink::default();

        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert_eq!(end, SessionEnd::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_once_links_settle() {
        let mut h = harness();
        h.device.connected();
        h.broker.connected();
        h.shared
            .record_retained("crestron/gone".to_string(), b"1".to_vec())
            .await;

        let sink = RecordingSink::default();
        let trigger = h.trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.trigger();
        });

        let end = supervise(
            &SessionConfig::default(),
            &h.shared,
            &sink,
            &mut h.links,
            &mut h.forwards,
            &mut h.shutdown,
        )
        .await;

        assert_eq!(end, SessionEnd::Shutdown);
        assert_eq!(h.shared.cached().await, 0);
        assert!(sink.published.lock().unwrap().is_empty());
    }
}
