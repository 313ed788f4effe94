//! WebSocket transport implementation
//!
//! ORTC servers speak a SockJS-style dialect over a plain WebSocket: the
//! socket lives under `/broadcast/{server}/{connection}/websocket` and every
//! outbound frame is a JSON string literal.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info};
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{SocketTransport, TransportEvent, TransportReceiver, TransportSender};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Rewrite the server URL to the `/broadcast/.../websocket` endpoint
    pub broadcast_path: bool,
    /// Wrap outbound frames in quotes
    pub quote_frames: bool,
    /// Capacity of the outbound and event queues
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            broadcast_path: true,
            quote_frames: true,
            channel_capacity: 100,
        }
    }
}

/// Build the socket endpoint for an ORTC server URL.
///
/// `https`/`wss` map to `wss`, anything else to `ws`. The server id is a
/// random number in `1..=1000` and the connection id 8 random characters.
pub fn broadcast_url(server_url: &str) -> Result<String> {
    let url = Url::parse(server_url)
        .map_err(|_| TransportError::InvalidUrl(format!("Invalid URL: {}", server_url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(format!("Invalid URL: {}", server_url)))?;

    let secure = matches!(url.scheme(), "https" | "wss");
    let prefix = if secure { "wss" } else { "ws" };
    let port = url
        .port_or_known_default()
        .unwrap_or(if secure { 443 } else { 80 });

    let server_id = rand::rng().random_range(1..=1000u32);
    let connection_id = ortc_core::generate_id(8);

    Ok(format!(
        "{}://{}:{}/broadcast/{}/{}/websocket",
        prefix, host, port, server_id, connection_id
    ))
}

/// Encode a command as a quoted frame, escaping inner quotes.
pub fn quote_frame(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\\\""))
}

/// WebSocket transport
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
    quote_frames: bool,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let frame = if self.quote_frames {
            quote_frame(&text)
        } else {
            text
        };

        self.tx
            .send(WsMessage::Text(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)> {
        let endpoint = if self.config.broadcast_path {
            broadcast_url(url)?
        } else {
            url.to_string()
        };

        info!("Connecting to WebSocket: {}", endpoint);

        let (ws_stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        let (write, read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(self.config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(self.config.channel_capacity);

        let connected = Arc::new(Mutex::new(true));
        let connected_write = connected.clone();
        let connected_read = connected.clone();

        // Writer
        tokio::spawn(async move {
            let mut write = write;
            while let Some(msg) = send_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            *connected_write.lock() = false;
        });

        // Reader
        tokio::spawn(async move {
            let mut read = read;

            let _ = event_tx.send(TransportEvent::Opened).await;

            let mut close_reason = None;
            while let Some(result) = read.next().await {
                match result {
                    Ok(WsMessage::Text(text)) => {
                        let _ = event_tx.send(TransportEvent::Message(text)).await;
                    }
                    Ok(WsMessage::Binary(data)) => {
                        // Some proxies deliver text frames as binary
                        match String::from_utf8(data) {
                            Ok(text) => {
                                let _ = event_tx.send(TransportEvent::Message(text)).await;
                            }
                            Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        close_reason = frame.map(|f| f.reason.to_string());
                        info!("WebSocket closed: {:?}", close_reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        close_reason = Some(e.to_string());
                        break;
                    }
                }
            }

            *connected_read.lock() = false;
            let _ = event_tx
                .send(TransportEvent::Closed {
                    reason: close_reason,
                })
                .await;
        });

        let sender = WebSocketSender {
            tx: send_tx,
            connected,
            quote_frames: self.config.quote_frames,
        };
        let receiver = WebSocketReceiver { rx: event_rx };

        Ok((Arc::new(sender), Box::new(receiver)))
    }
}
