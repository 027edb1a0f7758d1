//! modelrpc Client
//!
//! A lifecycle-managed client for modelrpc servers. It dials through a
//! [`Connector`], correlates concurrent calls over one connection and
//! re-dials a bounded number of times when the connection drops.

pub mod client;
pub mod connector;
pub mod options;

pub use client::Client;
pub use connector::{Connector, TcpConnector};
pub use options::ClientOptions;
