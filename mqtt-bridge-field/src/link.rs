//! Connection state of one session link.

use std::fmt;

use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of a link. `Disconnected` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected { since: Instant },
    /// Lost after having been connected, or closed by the peer.
    Disconnected(String),
    /// Never got connected, or gave up on unrecoverable input.
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected(_) | ConnectionState::Failed(_)
        )
    }

    pub fn connected_since(&self) -> Option<Instant> {
        match self {
            ConnectionState::Connected { since } => Some(*since),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected { .. } => write!(f, "connected"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ConnectionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Create a reporter/observer pair for a named link.
pub fn link_channel(name: &'static str) -> (LinkReporter, watch::Receiver<ConnectionState>) {
    let (tx, rx) = watch::channel(ConnectionState::Idle);
    (LinkReporter { name, tx }, rx)
}

/// Publishes state transitions of one link.
#[derive(Debug)]
pub struct LinkReporter {
    name: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl LinkReporter {
    pub fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Move to `state`. Transitions out of a terminal state are ignored, and
    /// so is reconnecting a connected link.
    pub fn set(&self, state: ConnectionState) {
        let name = self.name;
        self.tx.send_if_modified(|current| {
            if current.is_terminal()
                || *current == state
                || (current.is_connected() && state.is_connected())
            {
                return false;
            }
            match &state {
                ConnectionState::Disconnected(_) | ConnectionState::Failed(_) => {
                    tracing::warn!(link = name, state = %state, "Link state changed");
                }
                _ => tracing::info!(link = name, state = %state, "Link state changed"),
            }
            *current = state;
            true
        });
    }

    pub fn connecting(&self) {
        self.set(ConnectionState::Connecting);
    }

    pub fn connected(&self) {
        self.set(ConnectionState::Connected {
            since: Instant::now(),
        });
    }

    /// Terminal state for a link that dropped: `Disconnected` when it had
    /// been connected, `Failed` otherwise.
    pub fn lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.current().is_connected() {
            self.set(ConnectionState::Disconnected(reason));
        } else {
            self.set(ConnectionState::Failed(reason));
        }
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.set(ConnectionState::Failed(reason.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let (reporter, rx) = link_channel("device");
        assert_eq!(*rx.borrow(), ConnectionState::Idle);

        reporter.connecting();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        reporter.connected();
        assert!(rx.borrow().is_connected());
        assert!(rx.borrow().connected_since().is_some());

        reporter.lost("closed by peer");
        assert_eq!(
            *rx.borrow(),
            ConnectionState::Disconnected("closed by peer".to_string())
        );
    }

    #[test]
    fn test_lost_before_connect_is_failure() {
        let (reporter, rx) = link_channel("broker");
        reporter.connecting();
        reporter.lost("refused");
        assert_eq!(*rx.borrow(), ConnectionState::Failed("refused".to_string()));
    }

    #[test]
    fn test_terminal_state_sticks() {
        let (reporter, rx) = link_channel("device");
        reporter.failed("timeout");
        reporter.connected();
        assert_eq!(*rx.borrow(), ConnectionState::Failed("timeout".to_string()));
        assert!(rx.borrow().is_terminal());
    }

    #[tokio::test]
    async fn test_observer_sees_change() {
        let (reporter, mut rx) = link_channel("device");
        let waiter = tokio::spawn(async move {
            rx.wait_for(|s| s.is_connected()).await.map(|s| (*s).clone())
        });
        reporter.connecting();
        reporter.connected();

        let state = waiter.await.unwrap().unwrap();
        assert!(state.is_connected());
    }
}
