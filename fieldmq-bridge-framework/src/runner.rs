//! Bridge runner: the session supervisor.

use std::fmt;
use std::future::Future;

use tokio::signal;
use tokio::sync::watch;
use tracing::Instrument;

use fieldmq_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::backoff::{FixedDelay, RestartPolicy};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// How a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The session never became healthy (a link failed to connect, or the
    /// connect window elapsed).
    Aborted(String),
    /// The session was healthy and then lost a link.
    Ended(String),
    /// Shutdown was requested.
    Shutdown,
}

impl SessionEnd {
    /// Whether both links were connected at some point.
    pub fn was_healthy(&self) -> bool {
        matches!(self, SessionEnd::Ended(_))
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Aborted(reason) => write!(f, "aborted: {}", reason),
            SessionEnd::Ended(reason) => write!(f, "ended: {}", reason),
            SessionEnd::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Create a linked trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half of a shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create another signal observing this trigger.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cooperative stop signal observed by workers.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires. Also returns if the trigger is dropped.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Per-session handle passed to the session closure.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// 1-based run number.
    pub run: u64,
    /// Process-wide shutdown.
    pub shutdown: ShutdownSignal,
}

/// Bridge runner that supervises bridge sessions.
///
/// Handles:
/// - Logging initialization
/// - Starting a fresh session, waiting for it to end
/// - Restarting after the delay chosen by a [`RestartPolicy`]
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use fieldmq_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///     runner
///         .run(|config, ctx| async move { my_session(config, ctx).await })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Delay between sessions.
    policy: Box<dyn RestartPolicy>,
    /// Process-wide shutdown.
    shutdown: ShutdownTrigger,
    /// Listen for Ctrl+C.
    handle_signals: bool,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        // Initialize logging with optional CLI override
        let log_config = match args.and_then(|a| a.log_level.clone()) {
            Some(level) => LoggingConfig {
                level,
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        let runner = Self::without_logging(name, config);

        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");

        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        let (shutdown, _) = shutdown_channel();

        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            policy: Box::new(FixedDelay::new(std::time::Duration::from_secs(30))),
            shutdown,
            handle_signals: true,
        }
    }

    /// Replace the restart policy.
    pub fn with_restart_policy(mut self, policy: Box<dyn RestartPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Disable the Ctrl+C listener (for embedding and tests).
    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Trigger that stops the runner after the current session.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Run sessions until shutdown.
    ///
    /// Each call of `session` must build all of its state from scratch; the
    /// runner never hands state from one session to the next.
    pub async fn run<F, Fut>(mut self, mut session: F) -> Result<()>
    where
        F: FnMut(&C, SessionContext) -> Fut,
        Fut: Future<Output = SessionEnd>,
    {
        if self.handle_signals {
            let trigger = self.shutdown.clone();
            tokio::spawn(async move {
                match signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Received shutdown signal");
                        trigger.trigger();
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
                }
            });
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut run = 0u64;

        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        while !shutdown.is_triggered() {
            run += 1;
            tracing::info!(run, "Starting session");

            let ctx = SessionContext {
                run,
                shutdown: shutdown.clone(),
            };
            let end = session(&self.config, ctx)
                .instrument(tracing::info_span!("session", run))
                .await;

            if end == SessionEnd::Shutdown || shutdown.is_triggered() {
                break;
            }

            let delay = self.policy.next_delay(&end);
            tracing::warn!(
                run,
                outcome = %end,
                delay_secs = delay.as_secs_f64(),
                "Session finished, restarting after delay"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.triggered() => break,
            }
        }

        tracing::info!(bridge = %self.name, sessions = run, "Goodbye!");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrokerConfig, TopicPrefix};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        broker: BrokerConfig,
        #[serde(default)]
        logging: LoggingConfig,
        topic_prefix: TopicPrefix,
    }

    impl BridgeConfig for TestConfig {
        fn broker(&self) -> &BrokerConfig {
            &self.broker
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn topic_prefix(&self) -> &TopicPrefix {
            &self.topic_prefix
        }
    }

    fn test_config() -> TestConfig {
        TestConfig::from_json5(r#"{ broker: { host: "localhost" }, topic_prefix: "t/" }"#).unwrap()
    }

    #[tokio::test]
    async fn test_restarts_with_fresh_run_numbers() {
        let runner = BridgeRunner::without_logging("test", test_config())
            .without_signal_handler()
            .with_restart_policy(Box::new(FixedDelay::new(Duration::ZERO)));
        let trigger = runner.shutdown_trigger();

        let mut runs = Vec::new();
        runner
            .run(|_, ctx| {
                runs.push(ctx.run);
                if ctx.run == 3 {
                    trigger.trigger();
                }
                async { SessionEnd::Aborted("no device".to_string()) }
            })
            .await
            .unwrap();

        assert_eq!(runs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_session_shutdown_stops_runner() {
        let runner = BridgeRunner::without_logging("test", test_config())
            .without_signal_handler()
            .with_restart_policy(Box::new(FixedDelay::new(Duration::ZERO)));

        let mut count = 0;
        runner
            .run(|_, _| {
                count += 1;
                async { SessionEnd::Shutdown }
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_restart_delay() {
        let runner = BridgeRunner::without_logging("test", test_config())
            .without_signal_handler()
            .with_restart_policy(Box::new(FixedDelay::new(Duration::from_secs(3600))));
        let trigger = runner.shutdown_trigger();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });

        let mut count = 0;
        runner
            .run(|_, _| {
                count += 1;
                async { SessionEnd::Ended("device closed".to_string()) }
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
    }

    #[test]
    fn test_shutdown_signal() {
        let (trigger, signal) = shutdown_channel();
        let other = trigger.subscribe();
        assert!(!signal.is_triggered());

        trigger.trigger();
        assert!(signal.is_triggered());
        assert!(other.is_triggered());
    }

    #[test]
    fn test_session_end() {
        assert!(SessionEnd::Ended("x".to_string()).was_healthy());
        assert!(!SessionEnd::Aborted("x".to_string()).was_healthy());
        assert_eq!(SessionEnd::Shutdown.to_string(), "shutdown");
    }
}
