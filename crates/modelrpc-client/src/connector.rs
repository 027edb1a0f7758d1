use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use modelrpc_common::{Result, RpcError};

/// Opens the stream a [`Client`](crate::Client) runs its connection over.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials `addr`, giving up after `timeout`.
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<TcpStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<TcpStream> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(RpcError::Connection(format!(
                "failed to connect to {}: {}",
                addr, e
            ))),
            Err(_) => Err(RpcError::Connection(format!(
                "timed out connecting to {} after {:?}",
                addr, timeout
            ))),
        }
    }
}
