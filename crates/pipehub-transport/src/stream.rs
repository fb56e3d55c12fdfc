use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// How the platform channel treats write boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    /// One write of N bytes is delivered as one read of N bytes.
    Message,
    /// Writes may be coalesced or split across reads.
    Byte,
}

impl TransmissionMode {
    /// Mode used by channels on the current platform.
    pub const fn native() -> Self {
        #[cfg(windows)]
        {
            TransmissionMode::Message
        }
        #[cfg(not(windows))]
        {
            TransmissionMode::Byte
        }
    }

    /// Whether write boundaries survive delivery.
    pub fn preserves_boundaries(self) -> bool {
        matches!(self, TransmissionMode::Message)
    }
}

impl fmt::Display for TransmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmissionMode::Message => f.write_str("message"),
            TransmissionMode::Byte => f.write_str("byte"),
        }
    }
}

/// A connected duplex pipe channel.
///
/// On Unix this wraps a Unix domain socket stream. On Windows it wraps either
/// end of a message-mode named pipe. Closing the channel is dropping it.
pub struct PipeStream {
    inner: PipeStreamInner,
}

enum PipeStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    PipeServer(tokio::net::windows::named_pipe::NamedPipeServer),
    #[cfg(windows)]
    PipeClient(tokio::net::windows::named_pipe::NamedPipeClient),
}

impl PipeStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: PipeStreamInner::Unix(stream),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_server(
        pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    ) -> Self {
        Self {
            inner: PipeStreamInner::PipeServer(pipe),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_client(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
    ) -> Self {
        Self {
            inner: PipeStreamInner::PipeClient(pipe),
        }
    }

    /// Transmission mode of this channel.
    pub fn transmission_mode(&self) -> TransmissionMode {
        TransmissionMode::native()
    }

    /// Create a connected pair of channels (Unix only).
    #[cfg(unix)]
    pub fn pair() -> std::io::Result<(Self, Self)> {
        let (left, right) = tokio::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::PipeServer(pipe) => Pin::new(pipe).poll_read(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::PipeClient(pipe) => Pin::new(pipe).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::PipeServer(pipe) => Pin::new(pipe).poll_write(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::PipeClient(pipe) => Pin::new(pipe).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(windows)]
            PipeStreamInner::PipeServer(pipe) => Pin::new(pipe).poll_flush(cx),
            #[cfg(windows)]
            PipeStreamInner::PipeClient(pipe) => Pin::new(pipe).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(windows)]
            PipeStreamInner::PipeServer(pipe) => Pin::new(pipe).poll_shutdown(cx),
            #[cfg(windows)]
            PipeStreamInner::PipeClient(pipe) => Pin::new(pipe).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(_) => f.debug_struct("PipeStream").field("type", &"unix").finish(),
            #[cfg(windows)]
            PipeStreamInner::PipeServer(_) => f
                .debug_struct("PipeStream")
                .field("type", &"named-pipe-server")
                .finish(),
            #[cfg(windows)]
            PipeStreamInner::PipeClient(_) => f
                .debug_struct("PipeStream")
                .field("type", &"named-pipe-client")
                .finish(),
        }
    }
}
