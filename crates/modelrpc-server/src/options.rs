//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use modelrpc_common::{Result, RpcError};

/// Configuration for a [`Server`](crate::Server).
///
/// # Example
///
/// ```
/// use modelrpc_server::ServerOptions;
/// use std::time::Duration;
///
/// let options = ServerOptions::default()
///     .with_port(0)
///     .with_max_concurrent_clients(32)
///     .with_connection_timeout(Duration::from_secs(5));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Interface to bind, e.g. "127.0.0.1" or "0.0.0.0"
    pub host: String,
    /// TCP port; 0 picks an ephemeral port (see [`Server::local_addr`](crate::Server::local_addr))
    pub port: u16,
    /// Connections accepted at once; further connections are closed on accept
    pub max_concurrent_clients: usize,
    /// Bounds each frame write on an accepted connection
    pub connection_timeout: Duration,
    pub enable_tls: bool,
    pub certificate_path: Option<PathBuf>,
    pub certificate_key_path: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_concurrent_clients: 10,
            connection_timeout: Duration::from_secs(30),
            enable_tls: false,
            certificate_path: None,
            certificate_key_path: None,
        }
    }
}

impl ServerOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_concurrent_clients(mut self, max: usize) -> Self {
        self.max_concurrent_clients = max;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enables TLS with the given certificate and key files.
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.enable_tls = true;
        self.certificate_path = Some(cert_path.into());
        self.certificate_key_path = Some(key_path.into());
        self
    }

    /// The `host:port` string the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the options for values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RpcError::Connection("host cannot be empty".into()));
        }
        if self.max_concurrent_clients == 0 {
            return Err(RpcError::Connection(
                "max_concurrent_clients must be greater than zero".into(),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(RpcError::Connection(
                "connection_timeout must be greater than zero".into(),
            ));
        }
        if self.enable_tls && (self.certificate_path.is_none() || self.certificate_key_path.is_none()) {
            return Err(RpcError::Connection(
                "TLS requires both a certificate and a key path".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 5000);
        assert_eq!(options.max_concurrent_clients, 10);
        assert_eq!(options.connection_timeout, Duration::from_secs(30));
        assert!(!options.enable_tls);
        assert!(options.certificate_path.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let options = ServerOptions::default()
            .with_host("0.0.0.0")
            .with_port(8080)
            .with_max_concurrent_clients(100)
            .with_connection_timeout(Duration::from_secs(60))
            .with_tls("/path/to/cert.pem", "/path/to/key.pem");

        assert_eq!(options.bind_address(), "0.0.0.0:8080");
        assert_eq!(options.max_concurrent_clients, 100);
        assert_eq!(options.connection_timeout, Duration::from_secs(60));
        assert!(options.enable_tls);
        assert_eq!(
            options.certificate_path.as_deref(),
            Some(std::path::Path::new("/path/to/cert.pem"))
        );
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_clients_rejected() {
        let options = ServerOptions::default().with_max_concurrent_clients(0);
        assert!(matches!(options.validate(), Err(RpcError::Connection(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let options = ServerOptions::default().with_connection_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_tls_without_key_rejected() {
        let mut options = ServerOptions::default();
        options.enable_tls = true;
        options.certificate_path = Some("/path/to/cert.pem".into());
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("certificate and a key"));
    }
}
