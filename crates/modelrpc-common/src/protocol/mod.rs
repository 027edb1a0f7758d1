pub mod error;
pub mod jsonrpc;
pub mod requests;
pub mod responses;
pub mod validation;


pub use error::{Result, RpcError};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message};
pub use requests::{MethodName, ModelRequest, Parameter, RequestId, PROCESS_MODEL_METHOD};
pub use responses::ModelResponse;
pub use validation::{validate_request, ValidationError, ValidationResult};
