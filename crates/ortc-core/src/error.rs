//! Error types for ORTC protocol handling

use thiserror::Error;

/// Result type alias for ORTC core operations
pub type Result<T> = std::result::Result<T, Error>;

/// ORTC core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing, oversized or malformed argument
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// No permission hash covers the channel
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Server frame that matches none of the known shapes
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation frame carrying an operation this client does not know
    #[error("unknown operation \"{op}\" for the message \"{frame}\"")]
    UnknownOperation { op: String, frame: String },
}
