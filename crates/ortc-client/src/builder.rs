//! Client builder pattern

use ortc_transport::{HttpClient, SocketTransport};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::OrtcClient;

/// Builder for [`OrtcClient`]
#[derive(Default)]
pub struct OrtcBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn SocketTransport>>,
    http: Option<Arc<dyn HttpClient>>,
}

impl OrtcBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to a fixed server URL
    pub fn url(mut self, url: &str) -> Self {
        self.config.set_url(url);
        self
    }

    /// Resolve the server through a balancer
    pub fn cluster_url(mut self, url: &str) -> Self {
        self.config.set_cluster_url(url);
        self
    }

    pub fn announcement_sub_channel(mut self, sub_channel: &str) -> Self {
        self.config.announcement_sub_channel = sub_channel.to_string();
        self
    }

    pub fn connection_metadata(mut self, metadata: &str) -> Self {
        self.config.connection_metadata = metadata.to_string();
        self
    }

    /// Enable heartbeats with the given period (seconds) and fail limit
    pub fn heartbeat(mut self, time: u32, fails: u32) -> Self {
        self.config.heartbeat_active = true;
        self.config.set_heartbeat_time(time);
        self.config.set_heartbeat_fails(fails);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable/disable auto-reconnect
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.enable_reconnect = enabled;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Balancer attempts and the delay between them for retrying lookups
    pub fn cluster_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.config.cluster_max_attempts = max_attempts;
        self.config.cluster_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Use a custom socket transport
    pub fn transport(mut self, transport: Arc<dyn SocketTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom HTTP client for balancer lookups
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the client, filling in the default transports
    pub fn build(self) -> Result<OrtcClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let http = match self.http {
            Some(http) => http,
            None => default_http()?,
        };
        Ok(OrtcClient::new(self.config, transport, http))
    }

    /// Build and start connecting
    pub fn connect(self, app_key: &str, auth_token: &str) -> Result<OrtcClient> {
        let client = self.build()?;
        client.connect(app_key, auth_token)?;
        Ok(client)
    }

    /// Build, connect and wait for validation
    pub async fn connect_and_wait(
        self,
        app_key: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> Result<OrtcClient> {
        let client = self.build()?;
        client.connect_and_wait(app_key, auth_token, timeout).await?;
        Ok(client)
    }
}

#[cfg(feature = "websocket")]
fn default_transport() -> Result<Arc<dyn SocketTransport>> {
    Ok(Arc::new(ortc_transport::WebSocketTransport::new()))
}

#[cfg(not(feature = "websocket"))]
fn default_transport() -> Result<Arc<dyn SocketTransport>> {
    Err(crate::ClientError::InvalidArguments(
        "no socket transport configured".to_string(),
    ))
}

#[cfg(feature = "http")]
fn default_http() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(ortc_transport::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "http"))]
fn default_http() -> Result<Arc<dyn HttpClient>> {
    Err(crate::ClientError::InvalidArguments(
        "no HTTP client configured".to_string(),
    ))
}
