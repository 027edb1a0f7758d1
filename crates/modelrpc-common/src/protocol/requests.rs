use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Caller-assigned request identifier, echoed back in the response.
pub type RequestId = String;

/// Method name used to route a call to a handler.
pub type MethodName = String;

/// Wire method served by model handlers.
pub const PROCESS_MODEL_METHOD: &str = "mcp.processModel";

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A named, typed parameter passed alongside the model data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>, kind: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            value: value.into(),
            kind: kind.into(),
        }
    }
}

/// A request to process a model.
///
/// The identifier must be non-empty and unique among the caller's
/// outstanding calls; the server answers with a [`ModelResponse`] carrying
/// the same identifier.
///
/// # Example
///
/// ```
/// use modelrpc_common::protocol::{ModelRequest, Parameter};
/// use serde_json::json;
///
/// let request = ModelRequest::with_id("abc")
///     .with_data("name", json!("Test Model"))
///     .with_parameter(Parameter::new("param1", "value1", "string"));
///
/// assert_eq!(request.id, "abc");
/// assert_eq!(request.parameters.len(), 1);
/// ```
///
/// [`ModelResponse`]: crate::protocol::ModelResponse
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRequest {
    pub id: RequestId,
    #[serde(rename = "modelData", default)]
    pub model_data: Map<String, Value>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl ModelRequest {
    /// Creates an empty request with a freshly generated identifier.
    pub fn new() -> Self {
        Self::with_id(generate_request_id())
    }

    /// Creates an empty request with a caller-chosen identifier.
    pub fn with_id(id: impl Into<RequestId>) -> Self {
        ModelRequest {
            id: id.into(),
            model_data: Map::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.model_data.insert(key.into(), value);
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl Default for ModelRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a process-unique id of the form `mcp-<unix-nanos>-<counter>`.
pub fn generate_request_id() -> RequestId {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    // The counter keeps ids unique even when the clock does not advance
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    format!("mcp-{}-{}", nanos, counter)
}
