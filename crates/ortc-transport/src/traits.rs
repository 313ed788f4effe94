//! Transport trait definitions

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

/// Events that can occur on a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket established
    Opened,
    /// Socket closed (clean or error)
    Closed { reason: Option<String> },
    /// Text frame received
    Message(String),
    /// Error occurred
    Error(String),
}

/// Trait for sending text frames
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send a text frame
    async fn send(&self, text: String) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the socket
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving socket events
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event; `None` once the socket is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Opens sockets. A fresh socket is opened on every connect attempt.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Open a socket to `url`
    async fn open(&self, url: &str) -> Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)>;
}
