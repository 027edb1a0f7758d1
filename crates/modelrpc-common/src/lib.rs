//! modelrpc common types
//!
//! Shared building blocks for the modelrpc client and server:
//!
//! - [`protocol`]: model request/response types, the JSON-RPC envelope,
//!   request validation and the [`RpcError`] taxonomy
//! - [`lifecycle`]: the component status machine, status observers and the
//!   per-run cancellation scope
//! - [`context`]: per-call cancellation and deadlines
//! - [`transport`]: length-prefixed framing and the correlated
//!   [`Connection`]

pub mod context;
pub mod lifecycle;
pub mod protocol;
pub mod transport;

pub use context::CallContext;
pub use lifecycle::{
    Component, Lifecycle, RunScope, Status, StatusCallback, StatusChangeEvent, StatusNotifier,
};
pub use protocol::{
    JsonRpcError, ModelRequest, ModelResponse, Parameter, Result, RpcError, PROCESS_MODEL_METHOD,
};
pub use transport::{Connection, Dispatch};
