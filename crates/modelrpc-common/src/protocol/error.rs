use crate::lifecycle::Status;
use crate::protocol::jsonrpc::JsonRpcError;
use thiserror::Error;

/// Every failure the runtime can report.
///
/// The variants follow the layering of the protocol: lifecycle misuse
/// (`State`), connection establishment (`Connection`, `ReconnectExhausted`,
/// `NotConnected`), per-call outcomes (`Cancelled`, `DeadlineExceeded`,
/// `Protocol`, `Domain`) and registry misuse (`AlreadyRegistered`).
#[derive(Error, Debug)]
pub enum RpcError {
    /// A lifecycle operation was attempted from a state that does not allow it.
    #[error("cannot {operation} {role} in {status} state")]
    State {
        role: &'static str,
        operation: &'static str,
        status: Status,
    },

    /// Dialing, listening or the established stream failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The call context was cancelled before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    /// The call context deadline passed before a reply arrived.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// The peer answered with a JSON-RPC error object.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Protocol(JsonRpcError),

    /// The handler answered, but reported failure inside the response.
    #[error("request {id} failed: {message}")]
    Domain { id: String, message: String },

    /// The retry budget was spent without re-establishing the connection.
    #[error("max reconnection attempts reached ({attempts}): {source}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },

    /// A handler declared a method name that already has an owner.
    #[error("handler for method {0} already registered")]
    AlreadyRegistered(String),

    /// No connection is currently established.
    #[error("not connected to server")]
    NotConnected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Builds a [`RpcError::State`] for the given role and operation.
    pub fn state(role: &'static str, operation: &'static str, status: Status) -> Self {
        RpcError::State {
            role,
            operation,
            status,
        }
    }

    /// True for both cancellation flavours (explicit cancel and deadline).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RpcError::Cancelled | RpcError::DeadlineExceeded)
    }

    /// The JSON-RPC error code when this is a protocol-layer failure.
    pub fn protocol_code(&self) -> Option<i32> {
        match self {
            RpcError::Protocol(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
