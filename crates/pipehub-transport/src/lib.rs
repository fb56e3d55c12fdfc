//! Cross-platform local pipe channel.
//!
//! Provides a unified asynchronous interface over the platform's local
//! duplex channel:
//! - Unix domain sockets (Linux/macOS), byte mode
//! - Named pipes (Windows), message mode
//!
//! This is the lowest layer of pipehub. Everything else builds on the
//! [`PipeListener`] / [`ListenerSlot`] / [`PipeStream`] types provided here.

pub mod connector;
pub mod error;
pub mod listener;
pub mod name;
pub mod stream;

#[cfg(windows)]
pub mod pipe;
#[cfg(unix)]
pub mod uds;

pub use connector::connect;
pub use error::{Result, TransportError};
pub use listener::{ListenerSlot, PipeListener, DEFAULT_BUFFER_SIZE};
pub use name::PipeName;
pub use stream::{PipeStream, TransmissionMode};

#[cfg(windows)]
pub use pipe::NamedPipe;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
