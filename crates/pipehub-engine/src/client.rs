use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use pipehub_transport::TransmissionMode;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{Connection, Outbox};
use crate::error::{check_payload_size, EngineError, Result};
use crate::event::ClientHandler;

/// Single-connection pipe client.
///
/// `connect` waits up to the configured timeout for the endpoint, then runs
/// one read loop until the peer disconnects or [`IpcClient::stop`] is called.
/// A stopped or disconnected client may connect again.
pub struct IpcClient<H: ClientHandler> {
    config: ClientConfig,
    runtime: Handle,
    shared: Arc<Shared<H>>,
}

struct Shared<H> {
    handler: H,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    /// Read loop of the most recent connection. Held across `connect` so
    /// connects are serialized behind the previous disconnect.
    reader: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The live connection, tagged so a stale read loop cannot clear a newer one.
struct Link {
    generation: u64,
    outbox: Outbox,
}

impl<H> Shared<H> {
    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H: ClientHandler> IpcClient<H> {
    /// Create a client on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use
    /// [`IpcClient::with_runtime`] there.
    pub fn new(config: ClientConfig, handler: H) -> Self {
        Self::with_runtime(Handle::current(), config, handler)
    }

    /// Create a client whose read loop runs on `runtime`.
    pub fn with_runtime(runtime: Handle, config: ClientConfig, handler: H) -> Self {
        Self {
            config,
            runtime,
            shared: Arc::new(Shared {
                handler,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                reader: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Connect to the configured endpoint.
    ///
    /// `on_connected` is delivered before this returns. After a
    /// [`IpcClient::stop`], the previous connection's `on_disconnected` is
    /// delivered first. Fails with [`EngineError::AlreadyConnected`] while a
    /// connection is live, or with a transport error when the endpoint does
    /// not become available within the connect timeout. No events are raised
    /// on failure.
    pub async fn connect(&self) -> Result<()> {
        let mut reader = self.shared.reader.lock().await;
        if self.is_connected() {
            return Err(EngineError::AlreadyConnected);
        }
        if let Some(previous) = reader.take() {
            if let Err(err) = previous.await {
                debug!(error = %err, "previous read loop did not finish cleanly");
            }
        }

        let stream =
            pipehub_transport::connect(&self.config.name, self.config.connect_timeout).await?;
        let (connection, outbox) = Connection::open(stream, self.config.buffer_size);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.lock_link() = Some(Link { generation, outbox });

        info!(
            name = %self.config.name,
            mode = %TransmissionMode::native(),
            "client connected"
        );
        self.shared.handler.on_connected();

        *reader = Some(
            self.runtime
                .spawn(run_link(Arc::clone(&self.shared), generation, connection)),
        );
        Ok(())
    }

    /// Blocking form of [`IpcClient::connect`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn connect_blocking(&self) -> Result<()> {
        self.runtime.block_on(self.connect())
    }

    /// Queue `payload` for the server.
    ///
    /// Returns `Ok(false)` when not connected or for an empty payload.
    /// Delivery is not awaited; a failed write disconnects the client.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<bool> {
        let payload = payload.into();
        let link = self.shared.lock_link();
        let Some(link) = link.as_ref() else {
            return Ok(false);
        };
        if payload.is_empty() {
            return Ok(false);
        }
        check_payload_size(payload.len(), self.config.buffer_size)?;
        Ok(link.outbox.push(payload))
    }

    /// Wait until every payload queued by [`IpcClient::send`] has been
    /// written, or the connection has closed. Returns at once when not
    /// connected.
    pub async fn flush(&self) {
        let outbox = self
            .shared
            .lock_link()
            .as_ref()
            .map(|link| link.outbox.clone());
        if let Some(outbox) = outbox {
            outbox.flush().await;
        }
    }

    /// Close the connection, if any.
    ///
    /// Returns immediately. `on_disconnected` is delivered once the read loop
    /// has observed the close, and always before a later `connect` proceeds.
    pub fn stop(&self) {
        if let Some(link) = self.shared.lock_link().take() {
            debug!(generation = link.generation, "client stop requested");
            link.outbox.close();
        }
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.shared.lock_link().is_some()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The application's handler.
    pub fn handler(&self) -> &H {
        &self.shared.handler
    }
}

impl<H: ClientHandler> Drop for IpcClient<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_link<H: ClientHandler>(shared: Arc<Shared<H>>, generation: u64, connection: Connection) {
    let handler = &shared.handler;
    let reason = connection.run(|payload| handler.on_message(payload)).await;

    {
        let mut link = shared.lock_link();
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            *link = None;
        }
    }

    handler.on_disconnected();
    info!(%reason, "client disconnected");
}
