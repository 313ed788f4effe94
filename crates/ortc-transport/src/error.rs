//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("timeout")]
    Timeout,

    #[error("http error: {0}")]
    Http(String),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the error means the socket is gone, as opposed to a single
    /// failed write.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::ConnectionClosed
        )
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Other(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Http(e.to_string())
        }
    }
}
