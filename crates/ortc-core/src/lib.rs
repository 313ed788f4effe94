//! ORTC Core
//!
//! Protocol primitives for the ORTC realtime messaging protocol.
//!
//! This crate provides:
//! - Outbound command encoding and inbound frame classification ([`codec`])
//! - Multi-part message splitting and reassembly ([`multipart`])
//! - Channel permission tables ([`Permissions`])
//! - Input, URL and size validation ([`validation`])
//!
//! Nothing in here performs I/O; the client crate drives it.

pub mod codec;
pub mod error;
pub mod multipart;
pub mod permissions;
pub mod validation;

pub use codec::{decode, encode, Command, HeartbeatParams, Inbound, Operation, ServerError};
pub use error::{Error, Result};
pub use multipart::{build_parts, split_message, MultiPartReassembler, Part};
pub use permissions::Permissions;

/// Maximum size in bytes of a channel name plus one message fragment
pub const MAX_MESSAGE_SIZE: usize = 700;

/// Maximum size in bytes of a channel name (UTF-8)
pub const MAX_CHANNEL_SIZE: usize = 100;

/// Maximum size in bytes of the connection metadata
pub const MAX_CONNECTION_METADATA_SIZE: usize = 256;

/// Heartbeat interval bounds (seconds)
pub const HEARTBEAT_MIN_TIME: u32 = 10;
pub const HEARTBEAT_MAX_TIME: u32 = 60;

/// Heartbeat failure limit bounds
pub const HEARTBEAT_MIN_FAIL: u32 = 1;
pub const HEARTBEAT_MAX_FAIL: u32 = 6;

/// Length of the random id prefixed to every outbound message
pub const MESSAGE_ID_LENGTH: usize = 8;

/// Length of the random session id sent in the validate frame
pub const SESSION_ID_LENGTH: usize = 16;

/// Generate a random alphanumeric token of `len` characters.
///
/// Used for message ids, session ids and transport connection ids.
pub fn generate_id(len: usize) -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;

    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
