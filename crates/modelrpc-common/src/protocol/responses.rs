//! Model Response Types
//!
//! This module defines the response produced for a [`ModelRequest`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{Result, RpcError};
use super::{ModelRequest, RequestId};

/// The answer to a [`ModelRequest`].
///
/// # Response Flow
///
/// 1. Server receives a `mcp.processModel` call and decodes the request
/// 2. The registered handler produces a `ModelResponse` (success or failure)
/// 3. Response is sent back as the JSON-RPC result
/// 4. Client decodes it and hands it to the caller of `process_model`
///
/// A response with `success == false` is a domain-level failure: the call
/// itself went through, the handler just reported that it could not do the
/// work. Use [`ModelResponse::into_result`] to turn that into an error.
///
/// # Example
///
/// ```
/// use modelrpc_common::protocol::{ModelRequest, ModelResponse};
/// use serde_json::json;
///
/// let request = ModelRequest::with_id("abc");
/// let response = ModelResponse::for_request(&request)
///     .with_result("status", json!("processed"));
///
/// assert_eq!(response.id, "abc");
/// assert!(response.success);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    /// Identifier of the request this response answers
    pub id: RequestId,
    /// Whether the handler completed the work
    pub success: bool,
    /// Failure description (present iff `success` is false)
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Named result fields
    #[serde(default)]
    pub results: Map<String, Value>,
    /// When the response was created
    pub timestamp: DateTime<Utc>,
}

impl ModelResponse {
    /// Creates a successful, empty response for the given request.
    pub fn for_request(request: &ModelRequest) -> Self {
        Self::success(request.id.clone())
    }

    /// Creates a successful, empty response with the given identifier.
    pub fn success(id: impl Into<RequestId>) -> Self {
        ModelResponse {
            id: id.into(),
            success: true,
            error_message: None,
            results: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed response for the given request.
    ///
    /// # Example
    ///
    /// ```
    /// use modelrpc_common::protocol::{ModelRequest, ModelResponse};
    ///
    /// let request = ModelRequest::with_id("abc");
    /// let response = ModelResponse::failure(&request, "model rejected");
    /// assert!(!response.success);
    /// assert_eq!(response.error_message.as_deref(), Some("model rejected"));
    /// ```
    pub fn failure(request: &ModelRequest, message: impl Into<String>) -> Self {
        ModelResponse {
            id: request.id.clone(),
            success: false,
            error_message: Some(message.into()),
            results: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, key: impl Into<String>, value: Value) -> Self {
        self.results.insert(key.into(), value);
        self
    }

    /// Converts a domain-level failure into [`RpcError::Domain`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(RpcError::Domain {
                id: self.id,
                message: self
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            })
        }
    }
}
