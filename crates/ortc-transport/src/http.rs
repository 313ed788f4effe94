//! HTTP capability used for balancer lookups and REST sends

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Default bound on a single HTTP request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(11);

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP client.
///
/// Implementations fail the request once `timeout` elapses, and treat
/// error statuses (4xx/5xx) as failures.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse>;

    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

#[cfg(feature = "http")]
pub use reqwest_client::ReqwestHttpClient;

#[cfg(feature = "http")]
mod reqwest_client {
    use super::*;
    use crate::error::TransportError;
    use tracing::debug;

    /// [`HttpClient`] backed by `reqwest`
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestHttpClient {
        client: reqwest::Client,
    }

    impl ReqwestHttpClient {
        pub fn new() -> Self {
            Self {
                client: reqwest::Client::new(),
            }
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }

        async fn finish(response: reqwest::Response) -> Result<HttpResponse> {
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                return Err(TransportError::Http(format!("unexpected status {}", status)));
            }
            let body = response.text().await?;
            Ok(HttpResponse {
                status: status.as_u16(),
                body,
            })
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestHttpClient {
        async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
            debug!("GET {}", url);
            let response = self.client.get(url).timeout(timeout).send().await?;
            Self::finish(response).await
        }

        async fn post(
            &self,
            url: &str,
            body: String,
            headers: &[(&str, &str)],
            timeout: Duration,
        ) -> Result<HttpResponse> {
            debug!("POST {}", url);
            let mut request = self.client.post(url).timeout(timeout).body(body);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let response = request.send().await?;
            Self::finish(response).await
        }
    }
}
