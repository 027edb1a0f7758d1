//! Handlers and method-name dispatch.
//!
//! A handler declares the method names it serves and is stored in a typed
//! route table: [`Route::Model`] entries receive a decoded [`ModelRequest`],
//! [`Route::Raw`] entries receive the JSON params untouched. The route kind
//! is fixed at registration time, so dispatch is a single map lookup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use modelrpc_common::protocol::{MethodName, PROCESS_MODEL_METHOD};
use modelrpc_common::{CallContext, JsonRpcError, ModelRequest, ModelResponse, Result, RpcError};

/// Answers model-processing calls.
#[async_trait]
pub trait ModelHandler: Send + Sync + 'static {
    /// Method names this handler serves.
    fn methods(&self) -> Vec<MethodName>;

    /// Processes one request.
    ///
    /// An `Err` becomes an InternalError reply carrying the message; a
    /// domain-level failure should instead be returned as
    /// [`ModelResponse::failure`].
    async fn process_model(
        &self,
        ctx: CallContext,
        request: ModelRequest,
    ) -> anyhow::Result<ModelResponse>;
}

/// Answers calls with arbitrary JSON params and results.
#[async_trait]
pub trait RawHandler: Send + Sync + 'static {
    fn methods(&self) -> Vec<MethodName>;

    async fn handle(&self, ctx: CallContext, method: &str, params: Value) -> anyhow::Result<Value>;
}

/// What a method name resolves to.
#[derive(Clone)]
pub enum Route {
    Model(Arc<dyn ModelHandler>),
    Raw(Arc<dyn RawHandler>),
}

/// Method name → handler table for one server.
///
/// Each name has at most one owner. Registration checks every declared name
/// before inserting any, so a rejected handler leaves the table unchanged.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: RwLock<HashMap<MethodName, Route>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<H: ModelHandler>(&self, handler: H) -> Result<()> {
        self.register_model_arc(Arc::new(handler))
    }

    pub fn register_model_arc(&self, handler: Arc<dyn ModelHandler>) -> Result<()> {
        let methods = handler.methods();
        self.insert_all(methods, Route::Model(handler))
    }

    pub fn register_raw<H: RawHandler>(&self, handler: H) -> Result<()> {
        let handler: Arc<dyn RawHandler> = Arc::new(handler);
        let methods = handler.methods();
        self.insert_all(methods, Route::Raw(handler))
    }

    fn insert_all(&self, methods: Vec<MethodName>, route: Route) -> Result<()> {
        let mut unique = HashSet::new();
        let methods: Vec<MethodName> = methods
            .into_iter()
            .filter(|m| unique.insert(m.clone()))
            .collect();
        if methods.is_empty() {
            return Err(RpcError::InvalidRequest(
                "handler declares no methods".into(),
            ));
        }

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(taken) = methods.iter().find(|m| routes.contains_key(m.as_str())) {
            return Err(RpcError::AlreadyRegistered(taken.clone()));
        }
        for method in methods {
            tracing::debug!(method = %method, "registered handler");
            routes.insert(method, route.clone());
        }
        Ok(())
    }

    pub fn resolve(&self, method: &str) -> Option<Route> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.resolve(method).is_some()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<MethodName> {
        let mut methods: Vec<_> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves `method` and runs its handler.
    ///
    /// Every outcome is a reply: unknown method → MethodNotFound, params that
    /// do not decode → InvalidParams, handler error or a response carrying a
    /// different id → InternalError.
    pub async fn dispatch(
        &self,
        ctx: CallContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        let route = self.resolve(method).ok_or_else(|| {
            tracing::debug!(method, "no handler for method");
            JsonRpcError::method_not_found(method)
        })?;

        match route {
            Route::Model(handler) => {
                let request: ModelRequest = serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?;
                let id = request.id.clone();

                let response = handler.process_model(ctx, request).await.map_err(|e| {
                    tracing::warn!(method, id = %id, error = %e, "handler failed");
                    JsonRpcError::internal_error(&format!("processing error: {:#}", e))
                })?;
                if response.id != id {
                    tracing::warn!(method, id = %id, response_id = %response.id, "handler answered with a foreign id");
                    return Err(JsonRpcError::internal_error(&format!(
                        "response id {} does not match request id {}",
                        response.id, id
                    )));
                }

                serde_json::to_value(response)
                    .map_err(|e| JsonRpcError::internal_error(&format!("encoding response: {}", e)))
            }
            Route::Raw(handler) => handler.handle(ctx, method, params).await.map_err(|e| {
                tracing::warn!(method, error = %e, "handler failed");
                JsonRpcError::internal_error(&format!("processing error: {:#}", e))
            }),
        }
    }
}

/// Acknowledges every request as processed without doing any work.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultModelHandler;

impl DefaultModelHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelHandler for DefaultModelHandler {
    fn methods(&self) -> Vec<MethodName> {
        vec![PROCESS_MODEL_METHOD.to_string()]
    }

    async fn process_model(
        &self,
        _ctx: CallContext,
        request: ModelRequest,
    ) -> anyhow::Result<ModelResponse> {
        Ok(ModelResponse::for_request(&request)
            .with_result("status", json!("processed"))
            .with_result("message", json!("Model processed successfully")))
    }
}

/// Liveness probe served on `mcp.ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

pub const PING_METHOD: &str = "mcp.ping";

#[async_trait]
impl RawHandler for PingHandler {
    fn methods(&self) -> Vec<MethodName> {
        vec![PING_METHOD.to_string()]
    }

    async fn handle(&self, _ctx: CallContext, _method: &str, params: Value) -> anyhow::Result<Value> {
        Ok(json!({
            "pong": true,
            "echo": params,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelrpc_common::protocol::jsonrpc::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

    struct NamedHandler {
        methods: Vec<&'static str>,
        tag: &'static str,
    }

    #[async_trait]
    impl ModelHandler for NamedHandler {
        fn methods(&self) -> Vec<MethodName> {
            self.methods.iter().map(|m| m.to_string()).collect()
        }

        async fn process_model(
            &self,
            _ctx: CallContext,
            request: ModelRequest,
        ) -> anyhow::Result<ModelResponse> {
            Ok(ModelResponse::for_request(&request).with_result("handler", json!(self.tag)))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ModelHandler for FailingHandler {
        fn methods(&self) -> Vec<MethodName> {
            vec!["custom.fail".into()]
        }

        async fn process_model(
            &self,
            _ctx: CallContext,
            _request: ModelRequest,
        ) -> anyhow::Result<ModelResponse> {
            anyhow::bail!("model exploded")
        }
    }

    /// Answers with an id of its own choosing.
    struct ForeignIdHandler;

    #[async_trait]
    impl ModelHandler for ForeignIdHandler {
        fn methods(&self) -> Vec<MethodName> {
            vec!["custom.foreign".into()]
        }

        async fn process_model(
            &self,
            _ctx: CallContext,
            _request: ModelRequest,
        ) -> anyhow::Result<ModelResponse> {
            Ok(ModelResponse::success("not-abc"))
        }
    }

    fn request_params(id: &str) -> Value {
        serde_json::to_value(ModelRequest::with_id(id)).unwrap()
    }

    #[tokio::test]
    async fn test_default_handler_marks_processed() {
        let handler = DefaultModelHandler::new();
        assert_eq!(handler.methods(), vec!["mcp.processModel".to_string()]);

        let request = ModelRequest::with_id("test-request")
            .with_data("name", json!("Test Model"))
            .with_data("value", json!(42));
        let response = handler
            .process_model(CallContext::new(), request)
            .await
            .unwrap();

        assert_eq!(response.id, "test-request");
        assert!(response.success);
        assert_eq!(response.results["status"], json!("processed"));
        assert_eq!(
            response.results["message"],
            json!("Model processed successfully")
        );
    }

    #[test]
    fn test_multi_method_registration() {
        let registry = HandlerRegistry::new();
        registry
            .register_model(NamedHandler {
                methods: vec!["custom.method1", "custom.method2"],
                tag: "a",
            })
            .unwrap();
        assert_eq!(registry.methods(), vec!["custom.method1", "custom.method2"]);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_original_kept() {
        let registry = HandlerRegistry::new();
        registry
            .register_model(NamedHandler {
                methods: vec!["custom.a"],
                tag: "first",
            })
            .unwrap();

        let err = registry
            .register_model(NamedHandler {
                methods: vec!["custom.a"],
                tag: "second",
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::AlreadyRegistered(ref m) if m == "custom.a"));

        let out = registry
            .dispatch(CallContext::new(), "custom.a", request_params("x"))
            .await
            .unwrap();
        assert_eq!(out["results"]["handler"], json!("first"));
    }

    #[test]
    fn test_partial_conflict_registers_nothing() {
        let registry = HandlerRegistry::new();
        registry
            .register_model(NamedHandler {
                methods: vec!["custom.b"],
                tag: "first",
            })
            .unwrap();

        let err = registry.register_model(NamedHandler {
            methods: vec!["custom.new", "custom.b"],
            tag: "second",
        });
        assert!(err.is_err());
        assert!(!registry.contains("custom.new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_method_list_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry
            .register_model(NamedHandler {
                methods: vec![],
                tag: "none",
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_model_and_raw_share_namespace() {
        let registry = HandlerRegistry::new();
        registry.register_raw(PingHandler).unwrap();
        let err = registry
            .register_model(NamedHandler {
                methods: vec!["mcp.ping"],
                tag: "clash",
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::AlreadyRegistered(_)));
        assert!(matches!(registry.resolve("mcp.ping"), Some(Route::Raw(_))));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = HandlerRegistry::new();
        let err = registry
            .dispatch(CallContext::new(), "custom.missing", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_bad_params() {
        let registry = HandlerRegistry::new();
        registry.register_model(DefaultModelHandler).unwrap();
        let err = registry
            .dispatch(CallContext::new(), PROCESS_MODEL_METHOD, json!([1, 2, 3]))
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_dispatch_handler_error() {
        let registry = HandlerRegistry::new();
        registry.register_model(FailingHandler).unwrap();
        let err = registry
            .dispatch(CallContext::new(), "custom.fail", request_params("f"))
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.message, "processing error: model exploded");
    }

    #[tokio::test]
    async fn test_dispatch_success_keeps_id() {
        let registry = HandlerRegistry::new();
        registry.register_model(DefaultModelHandler).unwrap();
        let out = registry
            .dispatch(CallContext::new(), PROCESS_MODEL_METHOD, request_params("abc"))
            .await
            .unwrap();
        let response: ModelResponse = serde_json::from_value(out).unwrap();
        assert_eq!(response.id, "abc");
        assert_eq!(response.results["status"], json!("processed"));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_foreign_response_id() {
        let registry = HandlerRegistry::new();
        registry.register_model(ForeignIdHandler).unwrap();
        let err = registry
            .dispatch(CallContext::new(), "custom.foreign", request_params("abc"))
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.message, "response id not-abc does not match request id abc");
    }

    #[tokio::test]
    async fn test_ping_echoes_params() {
        let registry = HandlerRegistry::new();
        registry.register_raw(PingHandler).unwrap();
        let out = registry
            .dispatch(CallContext::new(), PING_METHOD, json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"pong": true, "echo": {"n": 1}}));
    }
}
