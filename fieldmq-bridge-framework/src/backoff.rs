//! Restart policies for the session supervisor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::SessionEnd;

/// Decides how long to wait before starting the next session.
pub trait RestartPolicy: Send {
    /// Delay before the next session, given how the last one ended.
    fn next_delay(&mut self, end: &SessionEnd) -> Duration;
}

/// Always wait the same delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RestartPolicy for FixedDelay {
    fn next_delay(&mut self, _end: &SessionEnd) -> Duration {
        self.delay
    }
}

/// Doubling delay for sessions that never became healthy, capped at `max`.
///
/// A session that reached the healthy state resets the delay to `initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl RestartPolicy for ExponentialBackoff {
    fn next_delay(&mut self, end: &SessionEnd) -> Duration {
        if end.was_healthy() {
            self.reset();
        }
        let delay = self.current;
        self.current = self.current.checked_mul(2).unwrap_or(self.max).min(self.max);
        delay
    }
}

/// Restart policy as written in configuration files.
///
/// ```text
/// restart: { policy: "fixed", delay_secs: 30 }
/// restart: { policy: "exponential", initial_secs: 1, max_secs: 300 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum RestartConfig {
    Fixed {
        #[serde(default = "default_delay_secs")]
        delay_secs: u64,
    },
    Exponential {
        #[serde(default = "default_initial_secs")]
        initial_secs: u64,
        #[serde(default = "default_max_secs")]
        max_secs: u64,
    },
}

fn default_delay_secs() -> u64 {
    30
}

fn default_initial_secs() -> u64 {
    1
}

fn default_max_secs() -> u64 {
    300
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self::Fixed {
            delay_secs: default_delay_secs(),
        }
    }
}

impl RestartConfig {
    /// Build the configured policy.
    pub fn build(&self) -> Box<dyn RestartPolicy> {
        match *self {
            Self::Fixed { delay_secs } => Box::new(FixedDelay::new(Duration::from_secs(delay_secs))),
            Self::Exponential {
                initial_secs,
                max_secs,
            } => Box::new(ExponentialBackoff::new(
                Duration::from_secs(initial_secs),
                Duration::from_secs(max_secs.max(initial_secs)),
            )),
        }
    }
}
