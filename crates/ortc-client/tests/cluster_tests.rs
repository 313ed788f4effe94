//! Balancer and REST Tests (ortc-client)
//!
//! - Resolving a server URL through the balancer, with and without retry
//! - Connecting in cluster mode
//! - Publishing over HTTP with MessageClient

use ortc_client::{ClientError, ClientEvent, ClusterResolver, MessageClient, RestMessage};
use ortc_test_utils::{MockHttpClient, TestClient, DEFAULT_TIMEOUT};
use ortc_transport::TransportError;
use std::sync::Arc;
use std::time::Duration;

const BALANCER: &str = "http://balancer.test/server/2.1";
const BALANCER_BODY: &str = "var SOCKET_SERVER = \"http://realserver.example/2.1\";";

fn message<'a>(channel: &'a str, text: &'a str) -> RestMessage<'a> {
    RestMessage {
        auth_token: "tok1",
        app_key: "key1",
        private_key: "pk1",
        channel,
        message: text,
    }
}

// ============================================================================
// Resolver Tests
// ============================================================================

#[tokio::test]
async fn test_resolve_server_url() {
    let http = MockHttpClient::new();
    http.push_response(200, BALANCER_BODY);
    let resolver = ClusterResolver::new(Arc::new(http.clone()));

    let url = resolver.resolve(BALANCER, "key1").await.unwrap();

    assert_eq!(url, "http://realserver.example/2.1");
    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].url, "http://balancer.test/server/2.1/?appkey=key1");
}

#[tokio::test]
async fn test_resolve_without_server_line_fails() {
    let http = MockHttpClient::new();
    http.push_response(200, "<html>maintenance</html>");
    let resolver = ClusterResolver::new(Arc::new(http));

    assert!(matches!(
        resolver.resolve(BALANCER, "key1").await,
        Err(ClientError::ConnectionError(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resolve_with_retry_exhausts_attempts() {
    let http = MockHttpClient::new();
    http.respond_always(200, "var OTHER = 1;");
    let resolver = ClusterResolver::new(Arc::new(http.clone()));

    let result = resolver
        .resolve_with_retry(BALANCER, "key1", 3, Duration::from_secs(5))
        .await;

    assert_eq!(
        result,
        Err(ClientError::ConnectionError(
            "Unable to connect to the authentication server".into()
        ))
    );
    assert_eq!(http.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_with_retry_recovers() {
    let http = MockHttpClient::new();
    http.push_error(TransportError::Timeout);
    http.push_response(200, BALANCER_BODY);
    let resolver = ClusterResolver::new(Arc::new(http.clone()));

    let start = tokio::time::Instant::now();
    let url = resolver
        .resolve_with_retry(BALANCER, "key1", 10, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(url, "http://realserver.example/2.1");
    assert_eq!(http.request_count(), 2);
    assert!(start.elapsed() >= Duration::from_secs(5));
}

// ============================================================================
// Cluster-Mode Client Tests
// ============================================================================

#[tokio::test]
async fn test_cluster_connect_uses_resolved_url() {
    let fixture = TestClient::with_builder(|b| b.cluster_url(BALANCER));
    fixture.http.push_response(200, BALANCER_BODY);

    let conn = fixture.connect().await;

    assert_eq!(conn.url(), "http://realserver.example/2.1");
    assert_eq!(
        fixture.client.url().as_deref(),
        Some("http://realserver.example/2.1")
    );
    assert_eq!(
        fixture.http.requests()[0].url,
        "http://balancer.test/server/2.1/?appkey=key1"
    );
}

#[tokio::test]
async fn test_cluster_lookup_uses_current_timeout() {
    let fixture = TestClient::with_builder(|b| b.cluster_url(BALANCER));
    fixture
        .client
        .configure(|config| config.connection_timeout_ms = 500);
    fixture.http.push_response(200, BALANCER_BODY);

    fixture.connect().await;

    assert_eq!(fixture.http.requests()[0].timeout, Duration::from_millis(500));
}

#[tokio::test]
async fn test_cluster_lookup_failure() {
    let fixture = TestClient::with_builder(|b| b.cluster_url(BALANCER).reconnect(false));
    fixture
        .http
        .fail_always(TransportError::Http("503 Service Unavailable".into()));

    fixture.client.connect("key1", "tok1").unwrap();

    assert!(fixture
        .events
        .wait_for(&ClientEvent::Disconnected, 1, DEFAULT_TIMEOUT)
        .await);
    assert!(fixture
        .events
        .has_exception_containing("Unable to get URL from cluster"));
    assert_eq!(fixture.transport.attempt_count(), 0);
}

#[tokio::test]
async fn test_invalid_cluster_url() {
    let fixture = TestClient::with_builder(|b| b.cluster_url("balancer"));

    assert_eq!(
        fixture.client.connect("key1", "tok1"),
        Err(ClientError::InvalidArguments("Invalid Cluster URL".into()))
    );
}

// ============================================================================
// REST Publish Tests
// ============================================================================

#[tokio::test]
async fn test_send_message_created() {
    let http = MockHttpClient::new();
    http.push_response(201, "");
    let client = MessageClient::new(Arc::new(http.clone()));

    let accepted = client
        .send_message("http://ortc.test", false, &message("news", "hello world"))
        .await
        .unwrap();

    assert!(accepted);
    let request = &http.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "http://ortc.test/send");
    assert_eq!(
        request.body.as_deref(),
        Some("AT=tok1&AK=key1&PK=pk1&C=news&M=hello+world")
    );
    assert!(request
        .headers
        .contains(&("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string())));
}

#[tokio::test]
async fn test_send_message_other_status() {
    let http = MockHttpClient::new();
    http.push_response(200, "queued");
    let client = MessageClient::new(Arc::new(http));

    let accepted = client
        .send_message("http://ortc.test", false, &message("news", "hi"))
        .await
        .unwrap();

    assert!(!accepted);
}

#[tokio::test]
async fn test_send_message_through_cluster() {
    let http = MockHttpClient::new();
    http.push_response(200, BALANCER_BODY);
    http.push_response(201, "");
    let client = MessageClient::new(Arc::new(http.clone()));

    let accepted = client
        .send_message(BALANCER, true, &message("news", "hi"))
        .await
        .unwrap();

    assert!(accepted);
    let requests = http.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].url, "http://realserver.example/2.1/send");
}

#[tokio::test]
async fn test_send_message_errors() {
    let http = MockHttpClient::new();
    http.push_error(TransportError::Http("500 Internal Server Error".into()));
    let client = MessageClient::new(Arc::new(http.clone()));

    assert!(matches!(
        client.send_message("", false, &message("news", "hi")).await,
        Err(ClientError::InvalidArguments(_))
    ));
    assert!(matches!(
        client
            .send_message("http://ortc.test", false, &message("news", "hi"))
            .await,
        Err(ClientError::Transport(TransportError::Http(_)))
    ));
    assert_eq!(http.request_count(), 1);
}
