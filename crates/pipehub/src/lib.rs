//! One-server, many-client local IPC.
//!
//! pipehub connects one server process to any number of client processes on
//! the same machine over the platform's local duplex channel: named pipes on
//! Windows, Unix domain sockets elsewhere. The server keeps a pool of pending
//! accepts, delivers every inbound chunk as a message event, and broadcasts
//! outbound payloads to all live clients.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoint naming, listeners, connect with timeout
//! - [`engine`]: server and client engines, handler traits, event queues
//!   (behind the default `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use pipehub_transport::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use pipehub_engine::*;
}
