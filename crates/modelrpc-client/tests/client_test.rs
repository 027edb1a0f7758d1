// Integration tests for modelrpc-client
//
// These tests run the client against a minimal in-process peer built from
// the shared `Connection` type, listening on a real loopback socket.

use async_trait::async_trait;
use modelrpc_client::{Client, ClientOptions, Connector, TcpConnector};
use modelrpc_common::lifecycle::RunScope;
use modelrpc_common::transport::{Connection, Dispatch};
use modelrpc_common::{
    CallContext, Component, JsonRpcError, ModelRequest, ModelResponse, Result, RpcError, Status,
    StatusChangeEvent, PROCESS_MODEL_METHOD,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

// ============================================================================
// Test Helpers
// ============================================================================

/// What the peer has seen and how it should misbehave.
#[derive(Default)]
struct PeerState {
    calls: AtomicUsize,
    wrong_id: AtomicBool,
}

struct PeerDispatch {
    state: Arc<PeerState>,
}

#[async_trait]
impl Dispatch for PeerDispatch {
    async fn dispatch(
        &self,
        ctx: CallContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            PROCESS_MODEL_METHOD => {
                let request: ModelRequest = serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?;
                let mut response =
                    ModelResponse::for_request(&request).with_result("status", json!("processed"));
                if self.state.wrong_id.load(Ordering::SeqCst) {
                    response.id = format!("{}-other", request.id);
                }
                Ok(serde_json::to_value(response).unwrap())
            }
            "slow" => {
                ctx.done().await;
                Err(JsonRpcError::internal_error("cancelled"))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }
}

/// Minimal peer: accepts connections and answers through `PeerDispatch`.
struct MockPeer {
    addr: SocketAddr,
    scope: RunScope,
    state: Arc<PeerState>,
}

impl MockPeer {
    async fn bind(addr: &str) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let scope = RunScope::new();
        let state = Arc::new(PeerState::default());

        let accept_scope = scope.clone();
        let dispatch: Arc<dyn Dispatch> = Arc::new(PeerDispatch {
            state: state.clone(),
        });
        scope.spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_scope.token().cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                if let Ok((stream, _)) = accepted {
                    let _ = Connection::open(
                        stream,
                        dispatch.clone(),
                        Duration::from_secs(5),
                        &accept_scope,
                    );
                }
            }
        });

        Self { addr, scope, state }
    }

    async fn start() -> Self {
        Self::bind("127.0.0.1:0").await
    }

    fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    async fn shutdown(self) {
        self.scope.shutdown().await;
    }
}

/// Connector that counts every dial.
struct CountingConnector {
    dials: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        TcpConnector.connect(addr, timeout).await
    }
}

fn options_for(addr: SocketAddr) -> ClientOptions {
    ClientOptions::default()
        .with_server_host(addr.ip().to_string())
        .with_server_port(addr.port())
        .with_connection_timeout(Duration::from_secs(2))
        .with_reconnect_delay(Duration::from_millis(10))
}

/// An address nothing is listening on.
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StatusChangeEvent>) -> Vec<StatusChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_stop_emits_ordered_events() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    let mut events = client.subscribe();

    client.start().await.unwrap();
    assert_eq!(client.status(), Status::Running);
    assert!(client.is_connected());

    client.stop().await.unwrap();
    assert_eq!(client.status(), Status::Stopped);
    assert!(!client.is_connected());

    let seen: Vec<_> = drain(&mut events)
        .into_iter()
        .map(|e| (e.old_status, e.new_status))
        .collect();
    assert_eq!(
        seen,
        vec![
            (Status::Stopped, Status::Starting),
            (Status::Starting, Status::Running),
            (Status::Running, Status::Stopping),
            (Status::Stopping, Status::Stopped),
        ]
    );
    peer.shutdown().await;
}

#[tokio::test]
async fn test_second_start_and_stop_are_state_errors() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));

    client.start().await.unwrap();
    let err = client.start().await.unwrap_err();
    assert_eq!(err.to_string(), "cannot start client in Running state");
    assert_eq!(client.status(), Status::Running);

    client.stop().await.unwrap();
    let err = client.stop().await.unwrap_err();
    assert!(matches!(err, RpcError::State { status: Status::Stopped, .. }));
    assert_eq!(client.status(), Status::Stopped);
    peer.shutdown().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));

    client.start().await.unwrap();
    client.stop().await.unwrap();
    client.start().await.unwrap();

    let response = client
        .process_model(&CallContext::new(), ModelRequest::with_id("again"))
        .await
        .unwrap();
    assert_eq!(response.id, "again");
    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_failed_dial_moves_to_failed() {
    let client = Client::new(options_for(dead_addr().await));
    let mut events = client.subscribe();

    let err = client.start().await.unwrap_err();
    assert!(matches!(err, RpcError::Connection(_)));
    assert_eq!(client.status(), Status::Failed);

    let events = drain(&mut events);
    let last = events.last().unwrap();
    assert_eq!(last.new_status, Status::Failed);
    assert!(last.error.is_some());

    // Failed is terminal
    assert!(matches!(
        client.start().await,
        Err(RpcError::State { status: Status::Failed, .. })
    ));
}

#[tokio::test]
async fn test_tls_is_rejected_at_start() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr).with_tls(true));

    let err = client.start().await.unwrap_err();
    assert!(err.to_string().contains("TLS not supported"));
    assert_eq!(client.status(), Status::Failed);
    peer.shutdown().await;
}

#[tokio::test]
async fn test_invalid_options_fail_start() {
    let client = Client::new(ClientOptions::default().with_server_port(0));
    assert!(matches!(client.start().await, Err(RpcError::Connection(_))));
    assert_eq!(client.status(), Status::Failed);
}

// ============================================================================
// Calls
// ============================================================================

#[tokio::test]
async fn test_process_model_round_trip() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let request = ModelRequest::with_id("abc").with_data("name", json!("Test Model"));
    let response = client
        .process_model(&CallContext::new(), request)
        .await
        .unwrap();

    assert_eq!(response.id, "abc");
    assert!(response.success);
    assert_eq!(response.results["status"], json!("processed"));

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_context_never_reaches_transport() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let ctx = CallContext::new();
    ctx.cancel();
    let err = client
        .process_model(&ctx, ModelRequest::with_id("abc"))
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.calls(), 0);

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_not_connected_before_start() {
    let client = Client::new(ClientOptions::default());
    let err = client
        .process_model(&CallContext::new(), ModelRequest::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NotConnected));
}

#[tokio::test]
async fn test_invalid_request_not_sent() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let err = client
        .process_model(&CallContext::new(), ModelRequest::with_id(""))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidRequest(_)));
    assert_eq!(peer.calls(), 0);

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_response_id_rejected() {
    let peer = MockPeer::start().await;
    peer.state.wrong_id.store(true, Ordering::SeqCst);
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let err = client
        .process_model(&CallContext::new(), ModelRequest::with_id("abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidResponse(_)));

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_call_deadline() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let ctx = CallContext::with_timeout(Duration::from_millis(50));
    let err = client.call(&ctx, "slow", json!({})).await.unwrap_err();
    assert!(matches!(err, RpcError::DeadlineExceeded));

    // The connection is still usable afterwards
    let response = client
        .process_model(&CallContext::new(), ModelRequest::with_id("after"))
        .await
        .unwrap();
    assert_eq!(response.id, "after");

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_stop_cancels_in_flight_call() {
    let peer = MockPeer::start().await;
    let client = Arc::new(Client::new(options_for(peer.addr)));
    client.start().await.unwrap();

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.call(&CallContext::new(), "slow", json!({})).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.stop().await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Cancelled | RpcError::Connection(_)));
    peer.shutdown().await;
}

#[tokio::test]
async fn test_unknown_method_is_protocol_error() {
    let peer = MockPeer::start().await;
    let client = Client::new(options_for(peer.addr));
    client.start().await.unwrap();

    let err = client
        .call(&CallContext::new(), "custom.missing", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.protocol_code(), Some(-32601));

    client.stop().await.unwrap();
    peer.shutdown().await;
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_reconnect_exhaustion_fails_client() {
    let peer = MockPeer::start().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let client = Client::with_connector(
        options_for(peer.addr).with_max_reconnect_attempts(3),
        Arc::new(CountingConnector {
            dials: dials.clone(),
        }),
    );
    let mut events = client.subscribe();

    client.start().await.unwrap();
    assert_eq!(dials.load(Ordering::SeqCst), 1);

    peer.shutdown().await;

    assert!(wait_until(|| client.status() == Status::Failed).await);
    assert!(dials.load(Ordering::SeqCst) - 1 <= 3);
    assert!(!client.is_connected());

    let failed = drain(&mut events)
        .into_iter()
        .find(|e| e.new_status == Status::Failed)
        .unwrap();
    assert_eq!(failed.old_status, Status::Running);
    assert!(matches!(
        failed.error.as_deref(),
        Some(RpcError::ReconnectExhausted { attempts: 3, .. })
    ));

    // No further dials once failed
    let settled = dials.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dials.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn test_disconnect_without_auto_reconnect() {
    let peer = MockPeer::start().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let client = Client::with_connector(
        options_for(peer.addr).with_auto_reconnect(false),
        Arc::new(CountingConnector {
            dials: dials.clone(),
        }),
    );
    client.start().await.unwrap();

    peer.shutdown().await;
    assert!(wait_until(|| !client.is_connected()).await);

    assert_eq!(client.status(), Status::Running);
    assert_eq!(dials.load(Ordering::SeqCst), 1);
    let err = client
        .process_model(&CallContext::new(), ModelRequest::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NotConnected));

    client.stop().await.unwrap();
    assert_eq!(client.status(), Status::Stopped);
}

#[tokio::test]
async fn test_reconnects_when_peer_returns() {
    let peer = MockPeer::start().await;
    let addr = peer.addr;
    let client = Client::new(
        options_for(addr)
            .with_max_reconnect_attempts(50)
            .with_reconnect_delay(Duration::from_millis(20)),
    );
    let mut events = client.subscribe();
    client.start().await.unwrap();

    peer.shutdown().await;
    assert!(wait_until(|| !client.is_connected()).await);

    let peer = MockPeer::bind(&addr.to_string()).await;
    assert!(wait_until(|| client.is_connected()).await);
    assert_eq!(client.status(), Status::Running);

    let response = client
        .process_model(&CallContext::new(), ModelRequest::with_id("back"))
        .await
        .unwrap();
    assert_eq!(response.id, "back");

    // Reconnection is invisible in the status stream
    let statuses: Vec<_> = drain(&mut events).into_iter().map(|e| e.new_status).collect();
    assert_eq!(statuses, vec![Status::Starting, Status::Running]);

    client.stop().await.unwrap();
    peer.shutdown().await;
}

#[tokio::test]
async fn test_stop_interrupts_reconnect_backoff() {
    let peer = MockPeer::start().await;
    let client = Client::new(
        options_for(peer.addr)
            .with_max_reconnect_attempts(100)
            .with_reconnect_delay(Duration::from_secs(30)),
    );
    client.start().await.unwrap();

    peer.shutdown().await;
    assert!(wait_until(|| !client.is_connected()).await);

    tokio::time::timeout(Duration::from_secs(2), client.stop())
        .await
        .expect("stop should not wait for the reconnect delay")
        .unwrap();
    assert_eq!(client.status(), Status::Stopped);
}
