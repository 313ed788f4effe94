//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Error reported by the server through `ortc-error`
    #[error("server error: {0}")]
    Server(String),

    #[error("transport error: {0}")]
    Transport(#[from] ortc_transport::TransportError),
}

impl From<ortc_core::Error> for ClientError {
    fn from(e: ortc_core::Error) -> Self {
        match e {
            ortc_core::Error::InvalidArguments(msg) => ClientError::InvalidArguments(msg),
            ortc_core::Error::PermissionDenied(msg) => ClientError::PermissionDenied(msg),
            ortc_core::Error::Protocol(msg) => ClientError::Protocol(msg),
            other @ ortc_core::Error::UnknownOperation { .. } => {
                ClientError::Protocol(other.to_string())
            }
        }
    }
}

impl ClientError {
    /// Whether the error was raised before anything was sent
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidArguments(_)
                | ClientError::PermissionDenied(_)
                | ClientError::NotConnected
                | ClientError::AlreadyConnected
                | ClientError::AlreadySubscribed(_)
                | ClientError::NotSubscribed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let e: ClientError = ortc_core::Error::InvalidArguments("Channel is null or empty".into()).into();
        assert_eq!(e, ClientError::InvalidArguments("Channel is null or empty".into()));

        let e: ClientError = ortc_core::Error::UnknownOperation {
            op: "ortc-weird".into(),
            frame: "a[...]".into(),
        }
        .into();
        assert!(matches!(e, ClientError::Protocol(msg) if msg.contains("ortc-weird")));
    }

    #[test]
    fn test_precondition_classification() {
        assert!(ClientError::NotConnected.is_precondition());
        assert!(ClientError::PermissionDenied("chat".into()).is_precondition());
        assert!(!ClientError::Timeout("validate".into()).is_precondition());
        assert!(!ClientError::Server("Invalid connection".into()).is_precondition());
    }
}
