//! Lifecycle-managed TCP server.
//!
//! # Architecture
//!
//! `start()` binds the listener and spawns a single accept loop. Each
//! accepted stream becomes a [`Connection`] whose inbound calls are
//! dispatched through the [`HandlerRegistry`], one task per call. Every task
//! belongs to the run's [`RunScope`]; `stop()` cancels the scope, which
//! drops the listener and tears down every connection, then waits for all
//! tasks to exit.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};

use modelrpc_common::lifecycle::{Component, Lifecycle, RunScope, Status, StatusCallback, StatusChangeEvent};
use modelrpc_common::transport::{Connection, Dispatch};
use modelrpc_common::{CallContext, JsonRpcError, Result, RpcError};

use crate::handler::{HandlerRegistry, ModelHandler, RawHandler};
use crate::options::ServerOptions;

/// Pause after a failed accept so persistent errors do not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[async_trait]
impl Dispatch for HandlerRegistry {
    async fn dispatch(
        &self,
        ctx: CallContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        HandlerRegistry::dispatch(self, ctx, method, params).await
    }
}

struct Running {
    scope: RunScope,
    local_addr: SocketAddr,
}

/// Serves registered handlers over TCP.
///
/// # Example
///
/// ```no_run
/// use modelrpc_common::Component;
/// use modelrpc_server::{DefaultModelHandler, Server, ServerOptions};
///
/// # async fn run() -> modelrpc_common::Result<()> {
/// let server = Server::new(ServerOptions::default().with_port(5000));
/// server.register_handler(DefaultModelHandler::new())?;
/// server.start().await?;
/// // ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    options: ServerOptions,
    lifecycle: Lifecycle,
    registry: Arc<HandlerRegistry>,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            lifecycle: Lifecycle::new("server"),
            registry: Arc::new(HandlerRegistry::new()),
            running: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Registers a model handler under every method it declares.
    pub fn register_handler<H: ModelHandler>(&self, handler: H) -> Result<()> {
        self.registry.register_model(handler)
    }

    pub fn register_raw_handler<H: RawHandler>(&self, handler: H) -> Result<()> {
        self.registry.register_raw(handler)
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.local_addr)
    }

    async fn listen(&self) -> Result<Running> {
        self.options.validate()?;
        if self.options.enable_tls {
            return Err(RpcError::Connection(
                "TLS not supported by TCP transport".into(),
            ));
        }

        let addr = self.options.bind_address();
        let listener = tokio::time::timeout(self.options.connection_timeout, TcpListener::bind(&addr))
            .await
            .map_err(|_| RpcError::Connection(format!("timed out binding {}", addr)))?
            .map_err(|e| RpcError::Connection(format!("failed to listen on {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("failed to get local address: {}", e)))?;

        let scope = RunScope::new();
        scope.spawn(accept_loop(
            listener,
            scope.clone(),
            self.registry.clone(),
            self.options.clone(),
        ));

        Ok(Running { scope, local_addr })
    }
}

#[async_trait]
impl Component for Server {
    async fn start(&self) -> Result<()> {
        self.lifecycle.begin_start()?;

        match self.listen().await {
            Ok(running) => {
                let local_addr = running.local_addr;
                *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(running);
                self.lifecycle.transition(Status::Running, None);
                tracing::info!(%local_addr, "server listening");
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    RpcError::Connection(message) => message,
                    other => other.to_string(),
                };
                tracing::error!(error = %message, "server failed to start");
                self.lifecycle.transition(
                    Status::Failed,
                    Some(Arc::new(RpcError::Connection(message.clone()))),
                );
                Err(RpcError::Connection(message))
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.begin_stop()?;

        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.scope.shutdown().await;
        }

        self.lifecycle.transition(Status::Stopped, None);
        tracing::info!("server stopped");
        Ok(())
    }

    fn status(&self) -> Status {
        self.lifecycle.status()
    }

    fn on_status_change(&self, callback: StatusCallback) {
        self.lifecycle.on_status_change(callback);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChangeEvent> {
        self.lifecycle.subscribe()
    }
}

async fn accept_loop(
    listener: TcpListener,
    scope: RunScope,
    registry: Arc<HandlerRegistry>,
    options: ServerOptions,
) {
    let admission = Arc::new(Semaphore::new(options.max_concurrent_clients));

    loop {
        let accepted = tokio::select! {
            _ = scope.token().cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                tokio::select! {
                    _ = scope.token().cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                }
            }
        };

        let Ok(permit) = admission.clone().try_acquire_owned() else {
            tracing::warn!(
                %peer,
                max = options.max_concurrent_clients,
                "client limit reached, closing connection"
            );
            drop(stream);
            continue;
        };

        let connection = match Connection::open(
            stream,
            registry.clone(),
            options.connection_timeout,
            &scope,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "failed to set up connection");
                continue;
            }
        };

        tracing::info!(%peer, "client connected");
        scope.spawn(async move {
            let _permit = permit;
            connection.closed().await;
            tracing::info!(%peer, "client disconnected");
        });
    }

    tracing::debug!("accept loop exited");
}
