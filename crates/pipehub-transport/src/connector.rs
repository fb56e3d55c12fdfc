use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::name::PipeName;
use crate::stream::PipeStream;

#[cfg(windows)]
use crate::pipe::{is_transient_connect_error, NamedPipe};
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Delay between attempts while the endpoint is absent or busy.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Connect to the endpoint for `name`, waiting up to `timeout`.
///
/// Attempts are repeated while the endpoint does not exist yet, refuses
/// connections, or (on Windows) has no free pipe instance. Any other error
/// fails immediately.
pub async fn connect(name: &PipeName, timeout: Duration) -> Result<PipeStream> {
    let path = name.endpoint();
    match tokio::time::timeout(timeout, connect_until_ready(&path)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(?path, ?timeout, "connect timed out");
            Err(TransportError::Timeout { path, timeout })
        }
    }
}

async fn connect_until_ready(path: &Path) -> Result<PipeStream> {
    loop {
        match attempt(path).await {
            Ok(stream) => return Ok(stream),
            Err(err) if is_transient_connect_error(&err) => {
                trace!(?path, error = %err, "endpoint not ready; retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(source) => {
                return Err(TransportError::Connect {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

#[cfg(unix)]
async fn attempt(path: &Path) -> std::io::Result<PipeStream> {
    UnixDomainSocket::connect(path).await
}

#[cfg(windows)]
async fn attempt(path: &Path) -> std::io::Result<PipeStream> {
    NamedPipe::connect(path).await
}

#[cfg(unix)]
fn is_transient_connect_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::listener::{PipeListener, DEFAULT_BUFFER_SIZE};

    fn unique_name(tag: &str) -> (std::path::PathBuf, PipeName) {
        let dir = std::env::temp_dir().join(format!(
            "pipehub-connect-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let name = PipeName::new(dir.join("endpoint.sock").to_string_lossy().into_owned())
            .expect("name should be valid");
        (dir, name)
    }

    #[tokio::test]
    async fn missing_endpoint_times_out() {
        let (dir, name) = unique_name("missing");

        let started = Instant::now();
        let err = connect(&name, Duration::from_millis(1))
            .await
            .expect_err("connect should fail");
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn waits_for_endpoint_to_appear() {
        let (dir, name) = unique_name("late");

        let late_name = name.clone();
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = PipeListener::bind(&late_name, DEFAULT_BUFFER_SIZE).expect("bind");
            let stream = listener.slot().expect("slot").accept().await;
            (listener, stream)
        });

        let client = connect(&name, Duration::from_secs(2)).await;
        assert!(client.is_ok(), "connect should succeed once bound");

        let (_listener, stream) = server.await.unwrap();
        assert!(stream.is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn non_transient_error_fails_fast() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let name = PipeName::new(long_path).unwrap();

        let started = Instant::now();
        let err = connect(&name, Duration::from_secs(5))
            .await
            .expect_err("connect should fail");
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
