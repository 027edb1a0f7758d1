//! Transport Layer
//!
//! Correlated JSON-RPC over TCP.
//!
//! # Architecture
//!
//! - **Wire Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Envelope**: one JSON-RPC 2.0 [`Message`] per frame
//! - **[`Connection`]**: one reader task and one writer task per stream;
//!   outgoing calls are matched to replies by id, inbound requests go to a
//!   [`Dispatch`] implementation, one task each
//!
//! Frames larger than [`MAX_FRAME_SIZE`] are rejected on both ends.
//!
//! [`Message`]: crate::protocol::Message

pub mod codec;
pub mod connection;

pub use codec::{decode_message, encode_message, read_frame, write_frame, MAX_FRAME_SIZE};
pub use connection::{Connection, Dispatch, RejectInbound};
