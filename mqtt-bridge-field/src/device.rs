//! Field-device link: TCP connection, read loop, decoding.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use fieldmq_bridge_framework::{BridgeError, ShutdownSignal};
use fieldmq_common::TopicPrefix;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::config::DeviceConfig;
use crate::decoder::{DecodeError, FrameDecoder};
use crate::link::LinkReporter;
use crate::session::SessionShared;

/// Why the read loop stopped.
#[derive(Debug)]
pub enum ReadEnd {
    /// The session asked the link to stop.
    Stopped,
    /// The device closed the stream.
    Closed,
    /// Nothing arrived within the read timeout.
    TimedOut(Duration),
    Io(io::Error),
    Decode(DecodeError),
    /// The forward queue is gone.
    Forward(BridgeError),
}

impl std::fmt::Display for ReadEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadEnd::Stopped => write!(f, "stopped"),
            ReadEnd::Closed => write!(f, "closed by device"),
            ReadEnd::TimedOut(after) => write!(f, "no data for {}s", after.as_secs()),
            ReadEnd::Io(e) => write!(f, "read error: {}", e),
            ReadEnd::Decode(e) => write!(f, "{}", e),
            ReadEnd::Forward(e) => write!(f, "{}", e),
        }
    }
}

/// Run the device link until it ends or `stop` fires.
///
/// Reports every state change through `reporter`; a link that was never
/// connected ends `Failed`, one that was ends `Disconnected` unless the
/// decoder gave up.
pub async fn run_device_link(
    config: DeviceConfig,
    prefix: TopicPrefix,
    shared: Arc<SessionShared>,
    reporter: LinkReporter,
    mut stop: ShutdownSignal,
) {
    reporter.connecting();
    let address = config.address();
    tracing::info!(address = %address, "Connecting to field device");

    let connect = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address));
    let stream = tokio::select! {
        biased;
        _ = stop.triggered() => {
            reporter.failed("stopped before connecting");
            return;
        }
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                reporter.failed(format!("connect to {} failed: {}", address, e));
                return;
            }
            Err(_) => {
                reporter.failed(format!(
                    "connect to {} timed out after {}s",
                    address, config.connect_timeout_secs
                ));
                return;
            }
        },
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Could not set TCP_NODELAY");
    }
    reporter.connected();

    let decoder = FrameDecoder::new(prefix, config.max_buffer_bytes);
    let end = read_frames(
        stream,
        decoder,
        config.read_chunk_size,
        config.read_timeout(),
        &shared,
        &mut stop,
    )
    .await;

    match end {
        ReadEnd::Decode(_) | ReadEnd::Forward(_) => reporter.failed(end.to_string()),
        _ => reporter.lost(end.to_string()),
    }
}

/// Read, decode and reconcile until the stream ends.
pub async fn read_frames<R>(
    mut reader: R,
    mut decoder: FrameDecoder,
    chunk_size: usize,
    read_timeout: Duration,
    shared: &SessionShared,
    stop: &mut ShutdownSignal,
) -> ReadEnd
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = stop.triggered() => return ReadEnd::Stopped,
            read = tokio::time::timeout(read_timeout, reader.read(&mut buf)) => read,
        };

        let n = match read {
            Ok(Ok(0)) => return ReadEnd::Closed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return ReadEnd::Io(e),
            Err(_) => return ReadEnd::TimedOut(read_timeout),
        };

        let decoded = match decoder.feed(&buf[..n]) {
            Ok(decoded) => decoded,
            Err(e) => return ReadEnd::Decode(e),
        };

        if let Err(e) = shared.apply(decoded).await {
            return ReadEnd::Forward(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{Reconciler, SweepTiming};
    use fieldmq_bridge_framework::{ForwardReceiver, SessionStats, forward_queue, shutdown_channel};
    use fieldmq_common::Value;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use crate::link::{ConnectionState, link_channel};

    fn shared() -> (Arc<SessionShared>, ForwardReceiver) {
        let (queue, rx) = forward_queue();
        let reconciler = Reconciler::new(SweepTiming::default(), Instant::now());
        (
            Arc::new(SessionShared::new(reconciler, queue, SessionStats::new(1))),
            rx,
        )
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(TopicPrefix::new("crestron/").unwrap(), 1024)
    }

    #[tokio::test]
    async fn test_read_frames_until_closed() {
        let (shared, mut rx) = shared();
        let (_trigger, mut stop) = shutdown_channel();
        let reader = tokio_test::io::Builder::new()
            .read(b":light1=5\r\n!li")
            .read(b"ght2=on\r\n")
            .build();

        let end = read_frames(reader, decoder(), 64, Duration::from_secs(40), &shared, &mut stop).await;
        assert!(matches!(end, ReadEnd::Closed));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, "crestron/light1");
        assert_eq!(first.value, Value::from("5"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.topic, "crestron/light2");

        let snapshot = shared.stats().snapshot();
        assert_eq!(snapshot.frames_decoded, 2);
        assert_eq!(snapshot.forwarded, 2);
    }

    #[tokio::test]
    async fn test_suppressed_frames_not_queued() {
        let (shared, rx) = shared();
        shared.record_retained("crestron/light1", b"5".to_vec()).await;
        let (_trigger, mut stop) = shutdown_channel();
        let reader = tokio_test::io::Builder::new()
            .read(b":light1=5\r\nnoise\r\n")
            .build();

        read_frames(reader, decoder(), 64, Duration::from_secs(40), &shared, &mut stop).await;

        assert!(rx.is_empty());
        let snapshot = shared.stats().snapshot();
        assert_eq!(snapshot.suppressed, 1);
        assert_eq!(snapshot.malformed_lines, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let (shared, mut rx) = shared();
        let (_trigger, mut stop) = shutdown_channel();
        let (mut device, reader) = tokio::io::duplex(64);
        device.write_all(b":a=1\r\n").await.unwrap();

        let end = read_frames(reader, decoder(), 64, Duration::from_secs(40), &shared, &mut stop).await;
        assert!(matches!(end, ReadEnd::TimedOut(after) if after == Duration::from_secs(40)));
        assert_eq!(rx.recv().await.unwrap().topic, "crestron/a");
        drop(device);
    }

    #[tokio::test]
    async fn test_stop_interrupts_read() {
        let (shared, _rx) = shared();
        let (trigger, mut stop) = shutdown_channel();
        let (_client, server) = tokio::io::duplex(64);

        trigger.trigger();
        let end = read_frames(server, decoder(), 64, Duration::from_secs(40), &shared, &mut stop).await;
        assert!(matches!(end, ReadEnd::Stopped));
    }

    #[tokio::test]
    async fn test_overflow_ends_link() {
        let (shared, _rx) = shared();
        let (_trigger, mut stop) = shutdown_channel();
        let reader = tokio_test::io::Builder::new().read(&[b'x'; 100]).build();
        let small = FrameDecoder::new(TopicPrefix::new("").unwrap(), 32);

        let end = read_frames(reader, small, 128, Duration::from_secs(40), &shared, &mut stop).await;
        assert!(matches!(end, ReadEnd::Decode(DecodeError::BufferOverflow { .. })));
    }

    #[tokio::test]
    async fn test_device_link_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b":light1=5\r\n").await.unwrap();
        });

        let (shared, mut rx) = shared();
        let (reporter, states) = link_channel("device");
        let (_trigger, stop) = shutdown_channel();

        run_device_link(
            DeviceConfig::new("127.0.0.1", port),
            TopicPrefix::new("crestron/").unwrap(),
            shared,
            reporter,
            stop,
        )
        .await;

        assert_eq!(
            *states.borrow(),
            ConnectionState::Disconnected("closed by device".to_string())
        );
        assert_eq!(rx.recv().await.unwrap().topic, "crestron/light1");
    }

    #[tokio::test]
    async fn test_device_link_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (shared, _rx) = shared();
        let (reporter, states) = link_channel("device");
        let (_trigger, stop) = shutdown_channel();

        run_device_link(
            DeviceConfig::new("127.0.0.1", port),
            TopicPrefix::new("crestron/").unwrap(),
            shared,
            reporter,
            stop,
        )
        .await;

        assert!(matches!(*states.borrow(), ConnectionState::Failed(_)));
    }
}
