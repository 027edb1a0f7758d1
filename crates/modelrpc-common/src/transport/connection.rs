use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::codec::{decode_message, encode_message, read_frame, write_frame, MAX_FRAME_SIZE};
use crate::context::CallContext;
use crate::lifecycle::RunScope;
use crate::protocol::error::{Result, RpcError};
use crate::protocol::jsonrpc::id_key;
use crate::protocol::requests::generate_request_id;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message};

/// Handles calls the peer initiates on a [`Connection`].
///
/// Each inbound request runs in its own task, so implementations must
/// tolerate concurrent invocation.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(
        &self,
        ctx: CallContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, JsonRpcError>;
}

/// Dispatcher for endpoints that do not serve calls.
pub struct RejectInbound;

#[async_trait]
impl Dispatch for RejectInbound {
    async fn dispatch(
        &self,
        _ctx: CallContext,
        method: &str,
        _params: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        tracing::warn!(method, "peer attempted an inbound call; not served here");
        Err(JsonRpcError::method_not_found(method))
    }
}

type Pending = Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>;

struct Inner {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Pending,
    closed: CancellationToken,
}

impl Inner {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<JsonRpcResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every outstanding reply sender, waking their callers.
    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(peer = %self.peer, count = drained.len(), "failing pending calls");
        }
    }

    /// Queues one encoded frame for the writer.
    ///
    /// Oversized frames are refused here so the writer never sees them and
    /// the connection stays up.
    fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(RpcError::InvalidRequest(format!(
                "Message too large: {} bytes (max {} bytes)",
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }
        if self.closed.is_cancelled() {
            return Err(RpcError::Connection("connection closed".into()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| RpcError::Connection("connection closed".into()))
    }
}

/// Removes a pending entry on every exit path of a call.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.id);
    }
}

/// One established, bidirectional JSON-RPC stream.
///
/// Outgoing calls are correlated to replies by id, so any number of calls
/// may be in flight at once. Inbound requests are handed to the
/// [`Dispatch`] given at open time. All background tasks belong to the
/// owner's [`RunScope`]; cancelling that scope closes the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Starts the reader and writer tasks for `stream`.
    ///
    /// `write_timeout` bounds every single frame write; a write that runs
    /// past it closes the connection.
    pub fn open(
        stream: TcpStream,
        dispatch: Arc<dyn Dispatch>,
        write_timeout: Duration,
        scope: &RunScope,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            peer,
            outbound,
            pending: Mutex::new(HashMap::new()),
            closed: scope.token().child_token(),
        });

        scope.spawn(write_loop(inner.clone(), writer, outbound_rx, write_timeout));
        scope.spawn(read_loop(inner.clone(), reader, dispatch, scope.clone()));

        tracing::debug!(%peer, "connection opened");
        Ok(Self { inner })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Calls `method` with a freshly generated id.
    pub async fn call(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value> {
        self.call_with_id(ctx, generate_request_id(), method, params)
            .await
    }

    /// Calls `method` using `id` as the wire id.
    ///
    /// Fails with [`RpcError::InvalidRequest`] if a call with the same id is
    /// already outstanding on this connection.
    pub async fn call_with_id(
        &self,
        ctx: &CallContext,
        id: String,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.is_closed() {
            return Err(RpcError::Connection("connection closed".into()));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending();
            if pending.contains_key(&id) {
                return Err(RpcError::InvalidRequest(format!(
                    "request id {} is already in flight",
                    id
                )));
            }
            pending.insert(id.clone(), tx);
        }
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.clone(),
        };

        let request = JsonRpcRequest::call(id, method, params);
        let frame = encode_message(&Message::Request(request))?;
        self.inner.send_frame(frame)?;

        let response = tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| {
                RpcError::Connection("connection lost before response".into())
            })?,
            _ = self.inner.closed.cancelled() => {
                return Err(RpcError::Connection("connection lost before response".into()));
            }
            err = ctx.done() => return Err(err),
        };

        response.into_outcome().map_err(RpcError::Protocol)
    }

    /// Sends a one-way notification; nothing is awaited.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        let request = JsonRpcRequest::notification(method, params);
        let frame = encode_message(&Message::Request(request))?;
        self.inner.send_frame(frame)
    }

    /// Resolves once the connection is closed or lost.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Closes the connection; outstanding calls fail with a connection error.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Number of calls awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.inner.pending().len()
    }
}

async fn write_loop(
    inner: Arc<Inner>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    write_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match tokio::time::timeout(write_timeout, write_frame(&mut writer, &frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(peer = %inner.peer, error = %e, "write failed, closing connection");
                break;
            }
            Err(_) => {
                tracing::warn!(peer = %inner.peer, ?write_timeout, "write timed out, closing connection");
                break;
            }
        }
    }

    inner.closed.cancel();
    let _ = writer.shutdown().await;
}

async fn read_loop(
    inner: Arc<Inner>,
    mut reader: OwnedReadHalf,
    dispatch: Arc<dyn Dispatch>,
    scope: RunScope,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.closed.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(bytes)) => handle_frame(&inner, &bytes, &dispatch, &scope),
            Ok(None) => {
                tracing::debug!(peer = %inner.peer, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %inner.peer, error = %e, "read failed, closing connection");
                break;
            }
        }
    }

    inner.closed.cancel();
    inner.fail_pending();
}

fn handle_frame(inner: &Arc<Inner>, bytes: &[u8], dispatch: &Arc<dyn Dispatch>, scope: &RunScope) {
    let message = match decode_message(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(peer = %inner.peer, error = %e, "undecodable frame");
            let reply = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(&e.to_string()));
            send_response(inner, reply);
            return;
        }
    };

    match message {
        Message::Response(response) => {
            let key = id_key(&response.id);
            match inner.pending().remove(&key) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    tracing::debug!(peer = %inner.peer, id = %key, "dropping reply with no pending call");
                }
            }
        }
        Message::Request(request) => {
            let inner = inner.clone();
            let dispatch = dispatch.clone();
            let ctx = CallContext::from_token(inner.closed.child_token());
            scope.spawn(async move {
                let JsonRpcRequest {
                    method, params, id, ..
                } = request;
                let teardown = ctx.clone();
                let outcome = tokio::select! {
                    outcome = dispatch.dispatch(ctx, &method, params) => outcome,
                    _ = teardown.done() => {
                        tracing::debug!(peer = %inner.peer, method = %method, "abandoning call on connection teardown");
                        return;
                    }
                };

                let Some(id) = id else {
                    if let Err(e) = outcome {
                        tracing::debug!(method = %method, error = %e.message, "notification failed");
                    }
                    return;
                };
                let reply = match outcome {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(error) => JsonRpcResponse::error(id, error),
                };
                send_response(&inner, reply);
            });
        }
    }
}

fn send_response(inner: &Inner, response: JsonRpcResponse) {
    let id = response.id.clone();
    let mut frame = match encode_message(&Message::Response(response)) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(peer = %inner.peer, error = %e, "failed to encode response");
            return;
        }
    };
    if frame.len() > MAX_FRAME_SIZE {
        tracing::error!(peer = %inner.peer, size = frame.len(), "response exceeds frame limit");
        let reply = JsonRpcResponse::error(
            id,
            JsonRpcError::internal_error(&format!(
                "response too large: {} bytes (max {} bytes)",
                frame.len(),
                MAX_FRAME_SIZE
            )),
        );
        frame = match encode_message(&Message::Response(reply)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(peer = %inner.peer, error = %e, "failed to encode response");
                return;
            }
        };
    }
    if inner.send_frame(frame).is_err() {
        tracing::debug!(peer = %inner.peer, "connection closed before response could be sent");
    }
}
