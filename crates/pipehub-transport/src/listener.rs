use std::path::Path;
#[cfg(unix)]
use std::sync::Arc;

use crate::error::Result;
use crate::name::PipeName;
use crate::stream::{PipeStream, TransmissionMode};

#[cfg(windows)]
use crate::pipe::NamedPipe;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Default per-direction buffer capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Server side of a pipe endpoint.
///
/// A listener hands out [`ListenerSlot`]s, each of which is one pending
/// accept. Any number of slots may be outstanding at once. Must be created
/// and used from within a Tokio runtime.
pub struct PipeListener {
    name: PipeName,
    inner: ListenerInner,
}

enum ListenerInner {
    #[cfg(unix)]
    Unix(Arc<UnixDomainSocket>),
    #[cfg(windows)]
    Pipe(NamedPipe),
}

impl PipeListener {
    /// Create the endpoint for `name`.
    ///
    /// `buffer_size` sizes the pipe's in/out buffers where the platform lets
    /// the caller choose (named pipes); it is ignored for Unix sockets.
    pub fn bind(name: &PipeName, buffer_size: usize) -> Result<Self> {
        let endpoint = name.endpoint();

        #[cfg(unix)]
        let inner = {
            let _ = buffer_size;
            ListenerInner::Unix(Arc::new(UnixDomainSocket::bind(&endpoint)?))
        };

        #[cfg(windows)]
        let inner = ListenerInner::Pipe(NamedPipe::bind(&endpoint, buffer_size)?);

        Ok(Self {
            name: name.clone(),
            inner,
        })
    }

    /// Create a new pending accept.
    pub fn slot(&self) -> Result<ListenerSlot> {
        let inner = match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(socket) => SlotInner::Unix(Arc::clone(socket)),
            #[cfg(windows)]
            ListenerInner::Pipe(pipe) => SlotInner::Pipe(pipe.instance()?),
        };
        Ok(ListenerSlot { inner })
    }

    /// The name this listener was bound with.
    pub fn name(&self) -> &PipeName {
        &self.name
    }

    /// The resolved platform endpoint.
    pub fn endpoint(&self) -> &Path {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(socket) => socket.path(),
            #[cfg(windows)]
            ListenerInner::Pipe(pipe) => pipe.path(),
        }
    }

    /// Transmission mode of accepted channels.
    pub fn transmission_mode(&self) -> TransmissionMode {
        TransmissionMode::native()
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(socket) => socket.transport_name(),
            #[cfg(windows)]
            ListenerInner::Pipe(pipe) => pipe.transport_name(),
        }
    }
}

impl std::fmt::Debug for PipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeListener")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

/// One pending accept on a [`PipeListener`].
///
/// Dropping a slot before its accept completes closes it; no connection is
/// lost on Unix, and the unconnected pipe instance is released on Windows.
pub struct ListenerSlot {
    inner: SlotInner,
}

enum SlotInner {
    #[cfg(unix)]
    Unix(Arc<UnixDomainSocket>),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeServer),
}

impl ListenerSlot {
    /// Wait for a peer to connect to this slot.
    pub async fn accept(self) -> Result<PipeStream> {
        match self.inner {
            #[cfg(unix)]
            SlotInner::Unix(socket) => socket.accept().await,
            #[cfg(windows)]
            SlotInner::Pipe(pipe) => NamedPipe::accept(pipe).await,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::connector::connect;

    fn unique_name(tag: &str) -> (std::path::PathBuf, PipeName) {
        let dir = std::env::temp_dir().join(format!(
            "pipehub-listener-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let name = PipeName::new(dir.join("listener.sock").to_string_lossy().into_owned())
            .expect("name should be valid");
        (dir, name)
    }

    #[tokio::test]
    async fn slot_accepts_one_connection() {
        let (dir, name) = unique_name("slot");
        let listener = PipeListener::bind(&name, DEFAULT_BUFFER_SIZE).expect("bind");
        assert_eq!(listener.endpoint(), name.endpoint().as_path());
        assert_eq!(listener.transport_name(), "unix-domain-socket");

        let slot = listener.slot().expect("slot");
        let accept = tokio::spawn(slot.accept());

        let mut client = connect(&name, std::time::Duration::from_secs(1))
            .await
            .expect("connect");
        client.write_all(b"hi").await.unwrap();

        let mut server = accept.await.unwrap().expect("accept");
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dropped_slot_leaves_listener_usable() {
        let (dir, name) = unique_name("drop-slot");
        let listener = PipeListener::bind(&name, DEFAULT_BUFFER_SIZE).expect("bind");

        drop(listener.slot().expect("first slot"));
        let accept = tokio::spawn(listener.slot().expect("second slot").accept());

        let _client = connect(&name, std::time::Duration::from_secs(1))
            .await
            .expect("connect");
        assert!(accept.await.unwrap().is_ok());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
