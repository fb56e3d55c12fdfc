//! Event surface shared by both engines.
//!
//! Applications either implement [`ServerHandler`] / [`ClientHandler`]
//! directly, or take the sum-typed [`ServerEvent`] / [`ClientEvent`] values
//! off a queue created with [`channel`].
//!
//! Handlers are called synchronously on a runtime worker thread. They must
//! return quickly and must not assume any particular thread; marshaling onto
//! another execution context is the application's job.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Process-unique identity of a server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives server lifecycle notifications.
///
/// For a given connection, `on_connected` happens before any `on_message`,
/// `on_message` calls never overlap, and `on_disconnected` follows the last
/// `on_message` exactly once. Calls for different connections may run
/// concurrently and in any order.
pub trait ServerHandler: Send + Sync + 'static {
    /// Per-connection application state.
    type State: Send + 'static;

    /// A peer connected. The returned state travels with the connection.
    fn on_connected(&self, id: ConnectionId) -> Self::State;

    /// A chunk arrived. `payload` is only valid for the duration of the call.
    fn on_message(&self, id: ConnectionId, payload: &[u8], state: &mut Self::State);

    /// The connection closed. Its state is handed back for the last time.
    fn on_disconnected(&self, id: ConnectionId, state: Self::State);
}

/// Receives client lifecycle notifications, with the same ordering rules as
/// [`ServerHandler`] for the single connection.
pub trait ClientHandler: Send + Sync + 'static {
    /// The client connected.
    fn on_connected(&self);

    /// A chunk arrived. `payload` is only valid for the duration of the call.
    fn on_message(&self, payload: &[u8]);

    /// The connection closed.
    fn on_disconnected(&self);
}

/// Server notification as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected(ConnectionId),
    Message(ConnectionId, Bytes),
    Disconnected(ConnectionId),
}

impl ServerEvent {
    /// The connection this event belongs to.
    pub fn id(&self) -> ConnectionId {
        match self {
            ServerEvent::Connected(id)
            | ServerEvent::Message(id, _)
            | ServerEvent::Disconnected(id) => *id,
        }
    }
}

/// Client notification as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Message(Bytes),
    Disconnected,
}

/// Create an event queue.
///
/// The [`EventSender`] half is a handler to pass to an engine; the
/// [`EventStream`] half yields the events. Message payloads are copied out of
/// the engine's receive buffer.
pub fn channel<E>() -> (EventSender<E>, EventStream<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventStream { rx })
}

/// Handler that forwards every notification onto a queue.
pub struct EventSender<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> EventSender<E> {
    fn emit(&self, event: E) {
        // A dropped stream means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl ServerHandler for EventSender<ServerEvent> {
    type State = ();

    fn on_connected(&self, id: ConnectionId) {
        self.emit(ServerEvent::Connected(id));
    }

    fn on_message(&self, id: ConnectionId, payload: &[u8], _state: &mut ()) {
        self.emit(ServerEvent::Message(id, Bytes::copy_from_slice(payload)));
    }

    fn on_disconnected(&self, id: ConnectionId, _state: ()) {
        self.emit(ServerEvent::Disconnected(id));
    }
}

impl ClientHandler for EventSender<ClientEvent> {
    fn on_connected(&self) {
        self.emit(ClientEvent::Connected);
    }

    fn on_message(&self, payload: &[u8]) {
        self.emit(ClientEvent::Message(Bytes::copy_from_slice(payload)));
    }

    fn on_disconnected(&self) {
        self.emit(ClientEvent::Disconnected);
    }
}

/// Receiving half of an event queue.
pub struct EventStream<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    /// Wait for the next event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

impl<E> futures_core::Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

impl<E> fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
