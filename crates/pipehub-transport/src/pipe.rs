use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, PipeMode, ServerOptions};
use tracing::{debug, info};
use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// Windows named pipe endpoint.
///
/// Every pending accept owns its own pipe instance. The first instance is
/// created at bind time so that a missing or already-owned name fails early.
pub struct NamedPipe {
    path: PathBuf,
    buffer_size: u32,
    first: Mutex<Option<NamedPipeServer>>,
}

impl NamedPipe {
    /// Create the first message-mode instance of the named pipe.
    pub fn bind(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let buffer_size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
        let first = create_instance(&path, buffer_size, true)?;

        info!(?path, "listening on named pipe");

        Ok(Self {
            path,
            buffer_size,
            first: Mutex::new(Some(first)),
        })
    }

    /// Take a not-yet-connected pipe instance for a new pending accept.
    pub fn instance(&self) -> Result<NamedPipeServer> {
        let first = self
            .first
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match first {
            Some(pipe) => Ok(pipe),
            None => create_instance(&self.path, self.buffer_size, false),
        }
    }

    /// Wait for a client to connect to `pipe`.
    pub async fn accept(pipe: NamedPipeServer) -> Result<PipeStream> {
        pipe.connect().await.map_err(TransportError::Accept)?;
        debug!("accepted named pipe client");
        Ok(PipeStream::from_pipe_server(pipe))
    }

    /// Make one connection attempt to a named pipe.
    pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<PipeStream> {
        let path = path.as_ref();
        let client = ClientOptions::new()
            .pipe_mode(PipeMode::Message)
            .open(path)?;
        debug!(?path, "connected to named pipe");
        Ok(PipeStream::from_pipe_client(client))
    }

    /// The pipe path this endpoint is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "named-pipe"
    }
}

fn create_instance(path: &Path, buffer_size: u32, first: bool) -> Result<NamedPipeServer> {
    ServerOptions::new()
        .first_pipe_instance(first)
        .pipe_mode(PipeMode::Message)
        .in_buffer_size(buffer_size)
        .out_buffer_size(buffer_size)
        .create(path)
        .map_err(|source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        })
}

/// Whether a failed connect attempt may succeed if retried.
pub(crate) fn is_transient_connect_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(ERROR_PIPE_BUSY as i32)
        || err.kind() == std::io::ErrorKind::NotFound
}
