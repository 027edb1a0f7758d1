//! Lifecycle-managed client with bounded reconnection.
//!
//! # Reconnection
//!
//! A watcher task follows the current connection's disconnect signal. When
//! the connection drops while the client is `Running` and auto-reconnect is
//! on, the watcher re-dials up to `max_reconnect_attempts` times, sleeping
//! `reconnect_delay` before each attempt. Both the sleep and the dial give
//! way to `stop()`. A successful dial swaps in the new connection and the
//! public status stays `Running` throughout; [`Client::is_connected`]
//! reports whether a connection is currently up. Running out of attempts
//! moves the client to `Failed` and releases its run scope.
//!
//! With auto-reconnect off, a lost connection is not replaced: the client
//! stays `Running`, emits no event, and calls fail with `NotConnected` until
//! it is stopped and started again.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use modelrpc_common::lifecycle::{Component, Lifecycle, RunScope, Status, StatusCallback, StatusChangeEvent};
use modelrpc_common::protocol::validate_request;
use modelrpc_common::transport::{Connection, RejectInbound};
use modelrpc_common::{CallContext, ModelRequest, ModelResponse, Result, RpcError, PROCESS_MODEL_METHOD};

use crate::connector::{Connector, TcpConnector};
use crate::options::ClientOptions;

/// Calls a modelrpc server.
///
/// # Example
///
/// ```no_run
/// use modelrpc_client::{Client, ClientOptions};
/// use modelrpc_common::{CallContext, Component, ModelRequest};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # async fn run() -> modelrpc_common::Result<()> {
/// let client = Client::new(ClientOptions::default().with_server_port(5000));
/// client.start().await?;
///
/// let ctx = CallContext::with_timeout(Duration::from_secs(5));
/// let request = ModelRequest::new().with_data("name", json!("Test Model"));
/// let response = client.process_model(&ctx, request).await?;
/// println!("{:?}", response.results);
///
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    options: ClientOptions,
    lifecycle: Lifecycle,
    connector: Arc<dyn Connector>,
    connection: RwLock<Option<Connection>>,
    scope: Mutex<Option<RunScope>>,
}

enum Reconnect {
    Connected(Connection),
    Cancelled,
    Exhausted(RpcError),
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector))
    }

    /// Builds a client that dials through `connector`.
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                lifecycle: Lifecycle::new("client"),
                connector,
                connection: RwLock::new(None),
                scope: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// Whether a connection to the server is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.current_connection().is_some()
    }

    /// Sends `request` as `mcp.processModel` and waits for the answer.
    ///
    /// The request id is used as the wire id, and the answer must carry the
    /// same id. A handler-reported failure comes back as `Ok` with
    /// `success == false`; see [`ModelResponse::into_result`].
    pub async fn process_model(
        &self,
        ctx: &CallContext,
        request: ModelRequest,
    ) -> Result<ModelResponse> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        validate_request(&request).into_result()?;
        let connection = self
            .shared
            .current_connection()
            .ok_or(RpcError::NotConnected)?;

        let params = serde_json::to_value(&request)?;
        let value = self
            .within_scope(connection.call_with_id(
                ctx,
                request.id.clone(),
                PROCESS_MODEL_METHOD,
                params,
            ))
            .await?;

        let response: ModelResponse = serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidResponse(format!("undecodable model response: {}", e)))?;
        if response.id != request.id {
            return Err(RpcError::InvalidResponse(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }

        Ok(response)
    }

    /// Calls an arbitrary method with raw JSON params.
    pub async fn call(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let connection = self
            .shared
            .current_connection()
            .ok_or(RpcError::NotConnected)?;
        self.within_scope(connection.call(ctx, method, params)).await
    }

    /// Sends a one-way notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.shared
            .current_connection()
            .ok_or(RpcError::NotConnected)?
            .notify(method, params)
    }

    /// Runs `call` until it finishes or the client is stopped.
    async fn within_scope<F>(&self, call: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>>,
    {
        let Some(token) = self.shared.scope_token() else {
            return Err(RpcError::NotConnected);
        };
        tokio::select! {
            biased;
            out = call => out,
            _ = token.cancelled() => Err(RpcError::Cancelled),
        }
    }
}

impl Shared {
    fn current_connection(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn set_connection(&self, connection: Option<Connection>) {
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = connection;
    }

    fn scope_token(&self) -> Option<CancellationToken> {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token().clone())
    }

    async fn dial(&self, scope: &RunScope) -> Result<Connection> {
        let addr = self.options.server_address();
        let stream = self
            .connector
            .connect(&addr, self.options.connection_timeout)
            .await?;
        Connection::open(
            stream,
            Arc::new(RejectInbound),
            self.options.connection_timeout,
            scope,
        )
        .map_err(|e| RpcError::Connection(format!("failed to set up connection to {}: {}", addr, e)))
    }

    async fn connect(&self) -> Result<(RunScope, Connection)> {
        self.options.validate()?;
        if self.options.enable_tls {
            return Err(RpcError::Connection(
                "TLS not supported by TCP transport".into(),
            ));
        }

        let scope = RunScope::new();
        let connection = self.dial(&scope).await?;
        Ok((scope, connection))
    }

    async fn reconnect(&self, scope: &RunScope) -> Reconnect {
        let max = self.options.max_reconnect_attempts;
        let mut last_error = RpcError::Connection("connection lost".into());

        for attempt in 1..=max {
            tracing::warn!(attempt, max, "attempting to reconnect");

            tokio::select! {
                _ = scope.token().cancelled() => return Reconnect::Cancelled,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
            }

            let dialed = tokio::select! {
                _ = scope.token().cancelled() => return Reconnect::Cancelled,
                dialed = self.dial(scope) => dialed,
            };

            match dialed {
                Ok(connection) => {
                    tracing::info!(attempt, addr = %self.options.server_address(), "reconnected to server");
                    return Reconnect::Connected(connection);
                }
                Err(e) => {
                    tracing::warn!(attempt, max, error = %e, "reconnection attempt failed");
                    last_error = e;
                }
            }
        }

        Reconnect::Exhausted(last_error)
    }

    /// Moves a running client to `Failed` and releases its run scope.
    fn fail(&self, error: RpcError) {
        tracing::error!(error = %error, "giving up on server connection");
        if self
            .lifecycle
            .transition_from(Status::Running, Status::Failed, Some(Arc::new(error)))
        {
            self.set_connection(None);
            let scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(scope) = scope {
                scope.cancel();
                scope.tracker().close();
            }
        }
    }
}

/// Follows the live connection and drives reconnection.
async fn watch(shared: Arc<Shared>, scope: RunScope, mut connection: Connection) {
    loop {
        tokio::select! {
            _ = scope.token().cancelled() => return,
            _ = connection.closed() => {}
        }
        if scope.is_cancelled() {
            return;
        }

        tracing::warn!(peer = %connection.peer_addr(), "disconnected from server");
        shared.set_connection(None);

        if !shared.options.auto_reconnect || shared.lifecycle.status() != Status::Running {
            return;
        }

        match shared.reconnect(&scope).await {
            Reconnect::Connected(next) => {
                shared.set_connection(Some(next.clone()));
                connection = next;
            }
            Reconnect::Cancelled => return,
            Reconnect::Exhausted(last_error) => {
                shared.fail(RpcError::ReconnectExhausted {
                    attempts: shared.options.max_reconnect_attempts,
                    source: Box::new(last_error),
                });
                return;
            }
        }
    }
}

#[async_trait]
impl Component for Client {
    async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        shared.lifecycle.begin_start()?;

        let (scope, connection) = match shared.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                let message = match e {
                    RpcError::Connection(message) => message,
                    other => other.to_string(),
                };
                tracing::error!(error = %message, "client failed to start");
                shared.lifecycle.transition(
                    Status::Failed,
                    Some(Arc::new(RpcError::Connection(message.clone()))),
                );
                return Err(RpcError::Connection(message));
            }
        };

        shared.set_connection(Some(connection.clone()));
        *shared.scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.clone());
        shared.lifecycle.transition(Status::Running, None);
        scope.spawn(watch(shared.clone(), scope.clone(), connection));

        tracing::info!(addr = %shared.options.server_address(), "client connected");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        shared.lifecycle.begin_stop()?;

        let scope = shared
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let connection = shared
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.close();
        }
        if let Some(scope) = scope {
            scope.shutdown().await;
        }

        shared.lifecycle.transition(Status::Stopped, None);
        tracing::info!("client stopped");
        Ok(())
    }

    fn status(&self) -> Status {
        self.shared.lifecycle.status()
    }

    fn on_status_change(&self, callback: StatusCallback) {
        self.shared.lifecycle.on_status_change(callback);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChangeEvent> {
        self.shared.lifecycle.subscribe()
    }
}
