//! Per-session counters.
//!
//! A [`SessionStats`] is created with each session and discarded with it;
//! counters are never carried across restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one bridge session.
#[derive(Debug)]
pub struct SessionStats {
    /// Session run number.
    run: u64,
    /// Wall-clock start, for reporting.
    started_at: DateTime<Utc>,
    /// Monotonic start, for uptime.
    start_time: Instant,
    /// Frames decoded from the device.
    frames_decoded: AtomicU64,
    /// Malformed lines skipped.
    malformed_lines: AtomicU64,
    /// Updates forwarded to the publish pipeline.
    forwarded: AtomicU64,
    /// Retained updates suppressed because the broker already held them.
    suppressed: AtomicU64,
    /// Retained messages replayed by the broker.
    broker_retained: AtomicU64,
    /// Successful publishes.
    published: AtomicU64,
    /// Failed publishes.
    publish_failed: AtomicU64,
}

/// Serializable view of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub run: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub frames_decoded: u64,
    pub malformed_lines: u64,
    pub forwarded: u64,
    pub suppressed: u64,
    pub broker_retained: u64,
    pub published: u64,
    pub publish_failed: u64,
}

impl SessionStats {
    pub fn new(run: u64) -> Self {
        Self {
            run,
            started_at: Utc::now(),
            start_time: Instant::now(),
            frames_decoded: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            broker_retained: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failed: AtomicU64::new(0),
        }
    }

    pub fn record_frames(&self, count: u64) {
        self.frames_decoded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: u64) {
        self.malformed_lines.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_retained(&self) {
        self.broker_retained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failed(&self) {
        self.publish_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            run: self.run,
            started_at: self.started_at,
            uptime_secs: self.start_time.elapsed().as_secs(),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            broker_retained: self.broker_retained.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
        }
    }
}
