//! Balancer lookup: application key to concrete server URL

use ortc_transport::{HttpClient, DEFAULT_HTTP_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

const SOCKET_SERVER_PREFIX: &str = "var SOCKET_SERVER = \"";
const SOCKET_SERVER_SUFFIX: &str = "\";";

/// Default number of attempts made by [`ClusterResolver::resolve_with_retry`]
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Resolves server URLs through an ORTC balancer
#[derive(Clone)]
pub struct ClusterResolver {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl ClusterResolver {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Bound on each balancer request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One balancer request.
    ///
    /// Fails with `ConnectionError` when the request fails or the body has
    /// no `var SOCKET_SERVER = "<url>";` line.
    pub async fn resolve(&self, balancer_url: &str, app_key: &str) -> Result<String> {
        let request_url = balancer_request_url(balancer_url, app_key);
        debug!("Resolving server through {}", request_url);

        let response = self
            .http
            .get(&request_url, self.timeout)
            .await
            .map_err(|e| ClientError::ConnectionError(format!("Balancer request failed: {}", e)))?;

        match parse_socket_server(&response.body) {
            Some(url) if !url.is_empty() => {
                info!("Balancer resolved {}", url);
                Ok(url.to_string())
            }
            _ => Err(ClientError::ConnectionError(
                "Balancer response has no server URL".to_string(),
            )),
        }
    }

    /// [`resolve`](Self::resolve) up to `max_attempts` times, sleeping
    /// `retry_delay` between attempts.
    pub async fn resolve_with_retry(
        &self,
        balancer_url: &str,
        app_key: &str,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<String> {
        for attempt in 1..=max_attempts {
            match self.resolve(balancer_url, app_key).await {
                Ok(url) => return Ok(url),
                Err(e) => {
                    warn!("Balancer attempt {}/{} failed: {}", attempt, max_attempts, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        Err(ClientError::ConnectionError(
            "Unable to connect to the authentication server".to_string(),
        ))
    }
}

impl std::fmt::Debug for ClusterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `{url}/?appkey={key}`, adding the slash only when missing
pub fn balancer_request_url(balancer_url: &str, app_key: &str) -> String {
    let mut url = balancer_url.to_string();
    if !url.is_empty() && !url.ends_with('/') {
        url.push('/');
    }
    if !app_key.is_empty() {
        url.push_str("?appkey=");
        url.push_str(app_key);
    }
    url
}

/// Extract `<url>` from `var SOCKET_SERVER = "<url>";` anywhere in `body`
pub fn parse_socket_server(body: &str) -> Option<&str> {
    let start = body.find(SOCKET_SERVER_PREFIX)? + SOCKET_SERVER_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(SOCKET_SERVER_SUFFIX)?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        assert_eq!(
            balancer_request_url("https://b.example.com/server/2.1", "abc"),
            "https://b.example.com/server/2.1/?appkey=abc"
        );
        assert_eq!(
            balancer_request_url("https://b.example.com/server/2.1/", "abc"),
            "https://b.example.com/server/2.1/?appkey=abc"
        );
        assert_eq!(
            balancer_request_url("https://b.example.com", ""),
            "https://b.example.com/"
        );
    }

    #[test]
    fn test_parse_socket_server() {
        assert_eq!(
            parse_socket_server("var SOCKET_SERVER = \"http://realserver.example/2.1\";"),
            Some("http://realserver.example/2.1")
        );
        assert_eq!(
            parse_socket_server("// header\nvar SOCKET_SERVER = \"https://a.b:443\";\n// trailer"),
            Some("https://a.b:443")
        );
        assert_eq!(parse_socket_server("<html>nope</html>"), None);
        assert_eq!(parse_socket_server("var SOCKET_SERVER = \"\";"), Some(""));
    }
}
