/// Errors surfaced by the server and client engines.
///
/// Read and write faults on a live connection never appear here; they are
/// reported as a disconnect event instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error (bind, connect, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] pipehub_transport::TransportError),

    /// `start` was called on a server that is not stopped.
    #[error("server already started")]
    AlreadyStarted,

    /// The listener pool must hold at least one slot.
    #[error("invalid listener pool size {0} (must be at least 1)")]
    InvalidInstances(usize),

    /// `connect` was called on a client that is already connected.
    #[error("client already connected")]
    AlreadyConnected,

    /// The payload does not fit the configured buffer capacity.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub(crate) fn check_payload_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(EngineError::PayloadTooLarge { size, max });
    }
    Ok(())
}
