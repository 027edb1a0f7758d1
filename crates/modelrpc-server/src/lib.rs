//! modelrpc Server
//!
//! A lifecycle-managed TCP server that routes JSON-RPC calls to handlers by
//! method name.
//!
//! - [`Server`]: listener, accept loop and per-connection dispatch
//! - [`HandlerRegistry`]: the method name → handler table
//! - [`ModelHandler`] / [`RawHandler`]: the two handler kinds
//! - [`ServerOptions`]: bind address, client limit, timeouts, TLS flags

pub mod handler;
pub mod options;
pub mod server;

pub use handler::{
    DefaultModelHandler, HandlerRegistry, ModelHandler, PingHandler, RawHandler, Route, PING_METHOD,
};
pub use options::ServerOptions;
pub use server::Server;
