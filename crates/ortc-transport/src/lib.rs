//! ORTC Transport Layer
//!
//! This crate provides the capabilities the ORTC client consumes:
//! - [`SocketTransport`]: a text socket with open/message/error/close events
//!   (WebSocket by default)
//! - [`HttpClient`]: GET/POST with a bounded timeout, used for balancer
//!   lookups and REST sends

pub mod error;
pub mod http;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use http::{HttpClient, HttpResponse, DEFAULT_HTTP_TIMEOUT};
pub use traits::{SocketTransport, TransportEvent, TransportReceiver, TransportSender};

#[cfg(feature = "http")]
pub use http::ReqwestHttpClient;

#[cfg(feature = "websocket")]
pub use websocket::{broadcast_url, quote_frame, WebSocketConfig, WebSocketTransport};
