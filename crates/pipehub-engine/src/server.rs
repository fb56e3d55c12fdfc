use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use pipehub_transport::{ListenerSlot, PipeListener, PipeStream, TransmissionMode};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, Outbox};
use crate::error::{check_payload_size, EngineError, Result};
use crate::event::{ConnectionId, ServerHandler};
use crate::registry::{EngineState, Registry};

/// Pause before replacing a listener slot whose accept failed.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Multi-peer pipe server.
///
/// Keeps `instances` pending accepts ready while running, runs one read loop
/// per connection, and broadcasts outbound payloads to every live peer.
pub struct IpcServer<H: ServerHandler> {
    config: ServerConfig,
    runtime: Handle,
    shared: Arc<Shared<H>>,
    run: Mutex<Option<Arc<Run>>>,
}

struct Shared<H> {
    handler: H,
    registry: Registry<Outbox>,
    pending_slots: AtomicUsize,
    buffer_size: usize,
}

/// Resources that live from `start` to `stop`.
struct Run {
    listener: PipeListener,
    slots: TaskTracker,
    connections: TaskTracker,
    shutdown: CancellationToken,
}

impl<H: ServerHandler> IpcServer<H> {
    /// Create a server on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use
    /// [`IpcServer::with_runtime`] there.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self::with_runtime(Handle::current(), config, handler)
    }

    /// Create a server whose tasks run on `runtime`.
    pub fn with_runtime(runtime: Handle, config: ServerConfig, handler: H) -> Self {
        let shared = Arc::new(Shared {
            handler,
            registry: Registry::new(),
            pending_slots: AtomicUsize::new(0),
            buffer_size: config.buffer_size,
        });
        Self {
            config,
            runtime,
            shared,
            run: Mutex::new(None),
        }
    }

    /// Bind the endpoint and fill the listener pool.
    ///
    /// Fails with [`EngineError::InvalidInstances`] for an empty pool,
    /// [`EngineError::AlreadyStarted`] unless stopped, and
    /// [`EngineError::Transport`] when the endpoint cannot be created.
    pub fn start(&self) -> Result<()> {
        if self.config.instances == 0 {
            return Err(EngineError::InvalidInstances(0));
        }
        // Held until the run is installed so a concurrent stop sees it.
        let mut current = self.lock_run();
        if !self.shared.registry.begin_start() {
            return Err(EngineError::AlreadyStarted);
        }

        let _guard = self.runtime.enter();
        let listener = match PipeListener::bind(&self.config.name, self.config.buffer_size) {
            Ok(listener) => listener,
            Err(err) => {
                self.shared.registry.abort_start();
                return Err(err.into());
            }
        };

        let mode = listener.transmission_mode();
        info!(
            endpoint = ?listener.endpoint(),
            instances = self.config.instances,
            %mode,
            "server listening"
        );
        if !mode.preserves_boundaries() {
            debug!("byte-mode channel: one write may arrive as several messages or merged with others");
        }

        let run = Arc::new(Run {
            listener,
            slots: TaskTracker::new(),
            connections: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        for _ in 0..self.config.instances {
            if let Err(err) = spawn_slot(&self.shared, &run) {
                run.shutdown.cancel();
                self.shared.registry.abort_start();
                return Err(err.into());
            }
        }

        *current = Some(run);
        Ok(())
    }

    /// Close every connection, wait until each disconnect has been
    /// delivered, then release the listener pool.
    ///
    /// A no-op unless the server is running.
    pub async fn stop(&self) {
        let Some(live) = self.shared.registry.begin_stop() else {
            return;
        };
        let run = self.lock_run().take();

        info!(connections = live.len(), "stopping server");
        for (_, outbox) in &live {
            outbox.close();
        }

        if let Some(run) = run {
            run.connections.close();
            run.connections.wait().await;

            // Pending accepts are abandoned, not awaited.
            run.shutdown.cancel();
            run.slots.close();
            run.slots.wait().await;
        }

        debug_assert!(self.shared.registry.is_empty());
        self.shared.registry.finish_stop();
        info!("server stopped");
    }

    /// Blocking form of [`IpcServer::stop`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn stop_blocking(&self) {
        self.runtime.block_on(self.stop());
    }

    /// Queue `payload` on every live connection.
    ///
    /// Returns `Ok(false)` when there is no connection or `payload` is empty,
    /// `Ok(true)` once every write has been issued. Delivery is not awaited. A connection that
    /// fails its write is disconnected on its own without affecting the
    /// others.
    pub fn broadcast(&self, payload: impl Into<Bytes>) -> Result<bool> {
        let payload = payload.into();
        let live = self.shared.registry.snapshot();
        if live.is_empty() || payload.is_empty() {
            return Ok(false);
        }
        check_payload_size(payload.len(), self.config.buffer_size)?;

        for (id, outbox) in live {
            if !outbox.push(payload.clone()) {
                debug!(%id, "skipping connection that is closing");
            }
        }
        Ok(true)
    }

    /// Queue `payload` on one connection.
    ///
    /// Returns `Ok(false)` when the connection is unknown or closing, or when
    /// `payload` is empty.
    pub fn send_to(&self, id: ConnectionId, payload: impl Into<Bytes>) -> Result<bool> {
        let payload = payload.into();
        let Some(outbox) = self.shared.registry.get(id) else {
            return Ok(false);
        };
        if payload.is_empty() {
            return Ok(false);
        }
        check_payload_size(payload.len(), self.config.buffer_size)?;
        Ok(outbox.push(payload))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.shared.registry.state()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Number of accepts currently outstanding.
    pub fn listener_slots(&self) -> usize {
        self.shared.pending_slots.load(Ordering::SeqCst)
    }

    /// Resolved endpoint while running.
    pub fn endpoint(&self) -> Option<PathBuf> {
        self.lock_run()
            .as_ref()
            .map(|run| run.listener.endpoint().to_path_buf())
    }

    /// Transmission mode of accepted channels.
    pub fn transmission_mode(&self) -> TransmissionMode {
        TransmissionMode::native()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The application's handler.
    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, Option<Arc<Run>>> {
        self.run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H: ServerHandler> Drop for IpcServer<H> {
    fn drop(&mut self) {
        if let Some(live) = self.shared.registry.begin_stop() {
            for (_, outbox) in &live {
                outbox.close();
            }
        }
        if let Some(run) = self.lock_run().take() {
            run.shutdown.cancel();
        }
    }
}

/// Create one pending accept and count it as outstanding.
fn spawn_slot<H: ServerHandler>(
    shared: &Arc<Shared<H>>,
    run: &Arc<Run>,
) -> pipehub_transport::Result<()> {
    let slot = run.listener.slot()?;
    shared.pending_slots.fetch_add(1, Ordering::SeqCst);
    run.slots
        .spawn(accept_one(Arc::clone(shared), Arc::clone(run), slot));
    Ok(())
}

async fn accept_one<H: ServerHandler>(shared: Arc<Shared<H>>, run: Arc<Run>, slot: ListenerSlot) {
    let accepted = tokio::select! {
        biased;
        _ = run.shutdown.cancelled() => None,
        accepted = slot.accept() => Some(accepted),
    };
    shared.pending_slots.fetch_sub(1, Ordering::SeqCst);

    match accepted {
        None => debug!("listener slot closed"),
        Some(Ok(stream)) => on_accept_complete(&shared, &run, stream),
        Some(Err(err)) if shared.registry.is_running() => {
            warn!(error = %err, "accept failed; replacing listener slot");
            tokio::select! {
                _ = run.shutdown.cancelled() => return,
                _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
            }
            replenish(&shared, &run);
        }
        Some(Err(err)) => debug!(error = %err, "accept aborted during shutdown"),
    }
}

fn on_accept_complete<H: ServerHandler>(shared: &Arc<Shared<H>>, run: &Arc<Run>, stream: PipeStream) {
    if !shared.registry.is_running() {
        debug!("server stopping; closing accepted channel");
        return;
    }

    let token = run.connections.token();
    let (connection, outbox) = Connection::open(stream, shared.buffer_size);
    let Some(id) = shared.registry.register(outbox) else {
        debug!("server stopped during accept; closing accepted channel");
        return;
    };

    replenish(shared, run);

    let state = shared.handler.on_connected(id);
    debug!(%id, "connection established");

    tokio::spawn(serve_connection(Arc::clone(shared), id, connection, state, token));
}

fn replenish<H: ServerHandler>(shared: &Arc<Shared<H>>, run: &Arc<Run>) {
    if let Err(err) = spawn_slot(shared, run) {
        warn!(error = %err, "failed to create replacement listener slot");
    }
}

async fn serve_connection<H: ServerHandler>(
    shared: Arc<Shared<H>>,
    id: ConnectionId,
    connection: Connection,
    mut state: H::State,
    _token: TaskTrackerToken,
) {
    let handler = &shared.handler;
    let reason = connection
        .run(|payload| handler.on_message(id, payload, &mut state))
        .await;

    let removed = shared.registry.remove(id);
    debug_assert!(removed, "connection {id} removed twice");

    handler.on_disconnected(id, state);
    debug!(%id, %reason, "connection closed");
}
