//! Client configuration.

use std::time::Duration;

use modelrpc_common::{Result, RpcError};

/// Configuration for a [`Client`](crate::Client).
///
/// # Example
///
/// ```
/// use modelrpc_client::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::default()
///     .with_server_host("127.0.0.1")
///     .with_server_port(9000)
///     .with_max_reconnect_attempts(5)
///     .with_reconnect_delay(Duration::from_millis(250));
/// assert_eq!(options.server_address(), "127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub server_host: String,
    pub server_port: u16,
    /// Bounds each dial and each frame write
    pub connection_timeout: Duration,
    /// Re-dial after the connection drops while running
    pub auto_reconnect: bool,
    /// Dial attempts per disconnection before the client fails
    pub max_reconnect_attempts: u32,
    /// Fixed pause before every reconnection attempt
    pub reconnect_delay: Duration,
    pub enable_tls: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 5000,
            connection_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
            enable_tls: false,
        }
    }
}

impl ClientOptions {
    pub fn with_server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = host.into();
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.enable_tls = enabled;
        self
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_host.trim().is_empty() {
            return Err(RpcError::Connection("server host cannot be empty".into()));
        }
        if self.server_port == 0 {
            return Err(RpcError::Connection("server port cannot be zero".into()));
        }
        if self.connection_timeout.is_zero() {
            return Err(RpcError::Connection(
                "connection_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
