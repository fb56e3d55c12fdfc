//! Connection-lifecycle engine for pipehub.
//!
//! [`IpcServer`] keeps a pool of pending accepts on one endpoint, runs a read
//! loop per connected peer, and broadcasts payloads to every live peer.
//! [`IpcClient`] is the single-connection counterpart. Both report what
//! happens through a handler trait ([`ServerHandler`], [`ClientHandler`]) or,
//! via [`event::channel`], as a stream of [`ServerEvent`] / [`ClientEvent`]
//! values.
//!
//! Both engines run on a multi-threaded Tokio runtime supplied by the
//! application.
//!
//! # Example
//!
//! ```no_run
//! use pipehub_engine::{event, IpcServer, PipeName, ServerConfig, ServerEvent};
//!
//! # async fn run() -> pipehub_engine::Result<()> {
//! let config = ServerConfig::new(PipeName::new("demo")?).with_instances(2);
//! let (sender, mut events) = event::channel::<ServerEvent>();
//! let server = IpcServer::new(config, sender);
//! server.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::Message(_, payload) = event {
//!         server.broadcast(payload)?;
//!     }
//! }
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod error;
pub mod event;
mod registry;
mod server;

pub use client::IpcClient;
pub use config::{ClientConfig, ServerConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INSTANCES};
pub use error::{EngineError, Result};
pub use event::{
    ClientEvent, ClientHandler, ConnectionId, EventSender, EventStream, ServerEvent,
    ServerHandler,
};
pub use registry::EngineState;
pub use server::IpcServer;

pub use pipehub_transport::{PipeName, TransmissionMode, TransportError, DEFAULT_BUFFER_SIZE};
