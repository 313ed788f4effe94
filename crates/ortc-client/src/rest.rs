//! REST publishing: send a message over HTTP without a socket session

use ortc_transport::{HttpClient, DEFAULT_HTTP_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{ClusterResolver, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::error::{ClientError, Result};

/// Status the server answers a successful publish with
const CREATED: u16 = 201;

/// Credentials and payload of one REST publish
#[derive(Debug, Clone, Copy)]
pub struct RestMessage<'a> {
    pub auth_token: &'a str,
    pub app_key: &'a str,
    pub private_key: &'a str,
    pub channel: &'a str,
    pub message: &'a str,
}

/// Publishes messages through the server's `send` endpoint
#[derive(Clone)]
pub struct MessageClient {
    http: Arc<dyn HttpClient>,
    resolver: ClusterResolver,
    timeout: Duration,
    cluster_max_attempts: u32,
    cluster_retry_delay: Duration,
}

impl MessageClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            resolver: ClusterResolver::new(http.clone()),
            http,
            timeout: DEFAULT_HTTP_TIMEOUT,
            cluster_max_attempts: DEFAULT_MAX_ATTEMPTS,
            cluster_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Client over the default reqwest HTTP stack
    #[cfg(feature = "http")]
    pub fn with_default_http() -> Self {
        Self::new(Arc::new(ortc_transport::ReqwestHttpClient::new()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.resolver = self.resolver.with_timeout(timeout);
        self
    }

    /// Attempts and delay used when resolving a cluster URL
    pub fn with_cluster_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.cluster_max_attempts = max_attempts;
        self.cluster_retry_delay = delay;
        self
    }

    /// Publish `msg`. In cluster mode `url` is a balancer URL and the
    /// server is resolved first (with retry).
    ///
    /// Returns whether the server accepted the message (HTTP 201).
    pub async fn send_message(&self, url: &str, is_cluster: bool, msg: &RestMessage<'_>) -> Result<bool> {
        if url.is_empty() {
            return Err(ClientError::InvalidArguments("URL is null or empty".to_string()));
        }

        let server = if is_cluster {
            self.resolver
                .resolve_with_retry(
                    url,
                    msg.app_key,
                    self.cluster_max_attempts,
                    self.cluster_retry_delay,
                )
                .await?
        } else {
            url.to_string()
        };

        let endpoint = send_endpoint(&server);
        debug!("Publishing to {} via {}", msg.channel, endpoint);

        let response = self
            .http
            .post(
                &endpoint,
                form_body(msg),
                &[
                    ("Content-Type", "application/x-www-form-urlencoded"),
                    ("Accept", "application/x-www-form-urlencoded"),
                ],
                self.timeout,
            )
            .await?;

        let accepted = response.status == CREATED;
        info!("Publish to {} answered {}", msg.channel, response.status);
        Ok(accepted)
    }
}

impl std::fmt::Debug for MessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("timeout", &self.timeout)
            .field("cluster_max_attempts", &self.cluster_max_attempts)
            .finish()
    }
}

/// `{server}/send`, adding the slash only when missing
pub fn send_endpoint(server: &str) -> String {
    if server.ends_with('/') {
        format!("{}send", server)
    } else {
        format!("{}/send", server)
    }
}

/// Form body `AT=..&AK=..&PK=..&C=..&M=..`
pub fn form_body(msg: &RestMessage<'_>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("AT", msg.auth_token)
        .append_pair("AK", msg.app_key)
        .append_pair("PK", msg.private_key)
        .append_pair("C", msg.channel)
        .append_pair("M", msg.message)
        .finish()
}
