use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use pipehub_transport::PipeStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a connection's read loop ended.
#[derive(Debug)]
pub(crate) enum DisconnectReason {
    /// The peer closed its end (zero-byte read).
    PeerClosed,
    /// The connection was closed locally (stop, drop).
    Closed,
    /// A read failed.
    ReadFailed(std::io::Error),
    /// A write failed and closed the connection.
    WriteFailed(std::io::Error),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("peer closed"),
            DisconnectReason::Closed => f.write_str("closed locally"),
            DisconnectReason::ReadFailed(err) => write!(f, "read failed: {err}"),
            DisconnectReason::WriteFailed(err) => write!(f, "write failed: {err}"),
        }
    }
}

/// Write side of a live connection.
///
/// Payloads are queued for the connection's writer task, which keeps at most
/// one write outstanding. Cloning shares the same queue.
#[derive(Clone)]
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    pending: Arc<Pending>,
}

/// Count of queued-but-unwritten payloads.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Outbox {
    /// Queue a payload. Returns false when the connection is already closing.
    pub(crate) fn push(&self, payload: Bytes) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.pending.count.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(payload).is_err() {
            self.pending.done();
            return false;
        }
        true
    }

    /// Wait until every queued payload has been written, or the connection
    /// has closed.
    pub(crate) async fn flush(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = idle => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Close the connection. The read loop observes this and runs the
    /// disconnect path.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// An accepted or connected channel before its read loop starts.
pub(crate) struct Connection {
    reader: ReadHalf<PipeStream>,
    writer: WriteHalf<PipeStream>,
    outbox: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<Pending>,
    buffer: Box<[u8]>,
    cancel: CancellationToken,
}

impl Connection {
    /// Split `stream` and allocate its receive buffer.
    pub(crate) fn open(stream: PipeStream, buffer_size: usize) -> (Self, Outbox) {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pending = Arc::new(Pending::default());
        let connection = Self {
            reader,
            writer,
            outbox: rx,
            pending: Arc::clone(&pending),
            buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
            cancel: cancel.clone(),
        };
        (
            connection,
            Outbox {
                tx,
                cancel,
                pending,
            },
        )
    }

    /// Pump the connection until it closes.
    ///
    /// Every chunk read is passed to `on_message` before the next read is
    /// issued. When this returns the channel has been closed and no further
    /// writes will be attempted.
    pub(crate) async fn run<F>(self, mut on_message: F) -> DisconnectReason
    where
        F: FnMut(&[u8]),
    {
        let Connection {
            mut reader,
            writer,
            outbox,
            pending,
            mut buffer,
            cancel,
        } = self;

        let writer_task = tokio::spawn(write_loop(writer, outbox, pending, cancel.clone()));

        let mut reason = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DisconnectReason::Closed,
                read = reader.read(&mut buffer) => read,
            };
            match read {
                Ok(0) => break DisconnectReason::PeerClosed,
                Ok(n) => on_message(&buffer[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break DisconnectReason::ReadFailed(err),
            }
        };

        cancel.cancel();
        match writer_task.await {
            Ok(Some(err)) if matches!(reason, DisconnectReason::Closed) => {
                reason = DisconnectReason::WriteFailed(err);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "writer task ended abnormally"),
        }
        drop(reader);
        reason
    }
}

/// Drain the outbox onto the channel, one write at a time.
///
/// Returns the write error that closed the connection, if any.
async fn write_loop(
    mut writer: WriteHalf<PipeStream>,
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<Pending>,
    cancel: CancellationToken,
) -> Option<std::io::Error> {
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            next = outbox.recv() => match next {
                Some(payload) => payload,
                None => return None,
            },
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            written = write_payload(&mut writer, &payload) => written,
        };
        pending.done();

        if let Err(err) = written {
            cancel.cancel();
            return Some(err);
        }
    }
}

async fn write_payload(
    writer: &mut WriteHalf<PipeStream>,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn delivers_chunks_and_reports_peer_close() {
        let (local, mut remote) = PipeStream::pair().unwrap();
        let (connection, _outbox) = Connection::open(local, 64);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let task = tokio::spawn(connection.run(move |chunk| {
            sink.lock().unwrap().extend_from_slice(chunk);
        }));

        remote.write_all(b"ping").await.unwrap();
        drop(remote);

        let reason = task.await.unwrap();
        assert!(matches!(reason, DisconnectReason::PeerClosed));
        assert_eq!(received.lock().unwrap().as_slice(), b"ping");
    }

    #[tokio::test]
    async fn outbox_writes_reach_peer() {
        let (local, mut remote) = PipeStream::pair().unwrap();
        let (connection, outbox) = Connection::open(local, 64);
        let task = tokio::spawn(connection.run(|_| {}));

        assert!(outbox.push(Bytes::from_static(b"one")));
        assert!(outbox.push(Bytes::from_static(b"two")));

        let mut buf = [0u8; 6];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"onetwo");

        outbox.flush().await;
        outbox.close();
        let reason = task.await.unwrap();
        assert!(matches!(reason, DisconnectReason::Closed));
        assert!(!outbox.push(Bytes::from_static(b"late")));

        // Local close is visible to the peer as end of stream.
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn flush_waits_for_queued_writes() {
        let (local, mut remote) = PipeStream::pair().unwrap();
        let (connection, outbox) = Connection::open(local, 64);
        let task = tokio::spawn(connection.run(|_| {}));

        // Nothing queued: returns at once.
        outbox.flush().await;

        for _ in 0..10 {
            assert!(outbox.push(Bytes::from_static(b"0123456789")));
        }
        outbox.flush().await;
        outbox.close();
        task.await.unwrap();

        let mut written = Vec::new();
        remote.read_to_end(&mut written).await.unwrap();
        assert_eq!(written.len(), 100);
    }

    #[tokio::test]
    async fn flush_returns_when_connection_closes() {
        let (local, _remote) = PipeStream::pair().unwrap();
        let (connection, outbox) = Connection::open(local, 64);
        outbox.close();
        connection.run(|_| {}).await;
        outbox.flush().await;
    }

    #[tokio::test]
    async fn chunks_are_bounded_by_buffer_size() {
        let (local, mut remote) = PipeStream::pair().unwrap();
        let (connection, _outbox) = Connection::open(local, 4);

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);
        let task = tokio::spawn(connection.run(move |chunk| {
            sink.lock().unwrap().push(chunk.len());
        }));

        remote.write_all(b"0123456789").await.unwrap();
        drop(remote);
        task.await.unwrap();

        let sizes = sizes.lock().unwrap();
        assert!(sizes.iter().all(|n| *n <= 4));
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let (local, remote) = PipeStream::pair().unwrap();
        let (connection, outbox) = Connection::open(local, 64);
        let task = tokio::spawn(connection.run(|_| {}));

        drop(remote);
        // The read side may notice the hangup first; either way the loop ends.
        for _ in 0..64 {
            if !outbox.push(Bytes::from_static(b"into the void")) {
                break;
            }
            tokio::task::yield_now().await;
        }

        let reason = task.await.unwrap();
        assert!(matches!(
            reason,
            DisconnectReason::PeerClosed | DisconnectReason::WriteFailed(_)
        ));
    }
}
