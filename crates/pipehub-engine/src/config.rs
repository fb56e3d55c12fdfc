use std::time::Duration;

use pipehub_transport::{PipeName, DEFAULT_BUFFER_SIZE};

/// Default connect timeout for clients.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10);

/// Default listener pool size for servers.
pub const DEFAULT_INSTANCES: usize = 1;

/// Server engine configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Endpoint to listen on.
    pub name: PipeName,
    /// Number of pending accepts kept ready while running. Default: 1.
    pub instances: usize,
    /// Receive buffer capacity and maximum outbound payload. Default: 4096.
    pub buffer_size: usize,
}

impl ServerConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(name: PipeName) -> Self {
        Self {
            name,
            instances: DEFAULT_INSTANCES,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the listener pool size.
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    /// Override the per-message buffer capacity.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Client engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint to connect to.
    pub name: PipeName,
    /// How long `connect` waits for the endpoint. Default: 10 ms.
    pub connect_timeout: Duration,
    /// Receive buffer capacity and maximum outbound payload. Default: 4096.
    pub buffer_size: usize,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(name: PipeName) -> Self {
        Self {
            name,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-message buffer capacity.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_sizes() {
        let name = PipeName::new("cfg-test").unwrap();

        let server = ServerConfig::new(name.clone());
        assert_eq!(server.instances, 1);
        assert_eq!(server.buffer_size, 4096);

        let client = ClientConfig::new(name);
        assert_eq!(client.connect_timeout, Duration::from_millis(10));
        assert_eq!(client.buffer_size, 4096);
    }

    #[test]
    fn builders_override_fields() {
        let name = PipeName::new("cfg-test").unwrap();
        let server = ServerConfig::new(name.clone())
            .with_instances(3)
            .with_buffer_size(512);
        assert_eq!((server.instances, server.buffer_size), (3, 512));

        let client = ClientConfig::new(name)
            .with_connect_timeout(Duration::from_secs(1))
            .with_buffer_size(256);
        assert_eq!(client.connect_timeout, Duration::from_secs(1));
        assert_eq!(client.buffer_size, 256);
    }
}
