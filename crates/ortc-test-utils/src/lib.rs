//! Common test helpers for ORTC tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A scripted socket transport that plays the server side of a session
//! - A scripted HTTP client for balancer lookups and REST sends
//! - Recorders for client events and channel messages
//! - Builders for the frames an ORTC server sends

use async_trait::async_trait;
use ortc_client::{ClientError, ClientEvent, OrtcClient};
use ortc_core::codec::OPEN_FRAME;
use ortc_transport::{
    HttpClient, HttpResponse, SocketTransport, TransportError, TransportEvent, TransportReceiver,
    TransportSender,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based.
///
/// Uses the tokio clock, so it also works in tests with paused time.
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() >= max_wait {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait for a synchronous condition
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

// ============================================================================
// Server Frames
// ============================================================================

/// Frames as an ORTC server writes them
pub mod frames {
    pub use ortc_core::codec::{HEARTBEAT_ACK_FRAME as HEARTBEAT_ACK, OPEN_FRAME as OPEN};

    /// `ortc-validated` with an optional permission table
    pub fn validated(permissions: Option<&[(&str, &str)]>, expiration: u32) -> String {
        let up = match permissions {
            None => "null".to_string(),
            Some(pairs) => {
                let body: Vec<String> = pairs
                    .iter()
                    .map(|(channel, hash)| format!("\\\"{}\\\":\\\"{}\\\"", channel, hash))
                    .collect();
                format!("{{{}}}", body.join(","))
            }
        };
        format!(
            "a[\"{{\\\"op\\\":\\\"ortc-validated\\\",\\\"up\\\":{},\\\"set\\\":{}}}\"]",
            up, expiration
        )
    }

    /// `ortc-validated` flagged busy
    pub fn validated_busy(expiration: u32) -> String {
        format!(
            "a[\"{{\\\"op\\\":\\\"ortc-validated\\\",\\\"up\\\":null,\\\"set\\\":{},\\\"busy\\\":true}}\"]",
            expiration
        )
    }

    pub fn subscribed(channel: &str) -> String {
        format!(
            "a[\"{{\\\"op\\\":\\\"ortc-subscribed\\\",\\\"ch\\\":\\\"{}\\\"}}\"]",
            channel
        )
    }

    pub fn unsubscribed(channel: &str) -> String {
        format!(
            "a[\"{{\\\"op\\\":\\\"ortc-unsubscribed\\\",\\\"ch\\\":\\\"{}\\\"}}\"]",
            channel
        )
    }

    /// `ortc-error` for `op`, optionally naming a channel
    pub fn error(op: &str, channel: Option<&str>, message: &str) -> String {
        let channel = channel
            .map(|ch| format!("\\\"ch\\\":\\\"{}\\\",", ch))
            .unwrap_or_default();
        format!(
            "a[\"{{\\\"op\\\":\\\"ortc-error\\\",\\\"ex\\\":{{\\\"op\\\":\\\"{}\\\",{}\\\"ex\\\":\\\"{}\\\"}}}}\"]",
            op, channel, message
        )
    }

    /// Operation frame with an op this client does not know
    pub fn unknown_operation(op: &str) -> String {
        format!("a[\"{{\\\"op\\\":\\\"{}\\\",\\\"x\\\":1}}\"]", op)
    }

    /// Channel payload exactly as given (no escaping applied)
    pub fn data(channel: &str, message: &str) -> String {
        format!(
            "a[\"{{\\\"ch\\\":\\\"{}\\\",\\\"m\\\":\\\"{}\\\"}}\"]",
            channel, message
        )
    }

    /// One fragment of a multi-part message
    pub fn part(channel: &str, message_id: &str, index: u32, total: u32, fragment: &str) -> String {
        data(
            channel,
            &format!("{}_{}-{}_{}", message_id, index, total, fragment),
        )
    }
}

// ============================================================================
// Mock Socket Transport
// ============================================================================

#[derive(Default)]
struct TransportState {
    attempts: Mutex<Vec<String>>,
    connections: Mutex<Vec<MockConnection>>,
    open_failures: Mutex<VecDeque<TransportError>>,
    hold_opens: AtomicBool,
}

/// A [`SocketTransport`] whose server side is driven by the test.
///
/// Every successful `open` yields a [`MockConnection`]; the test pushes
/// server frames through it and inspects what the client wrote.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `open` with `error`; calls queue up
    pub fn fail_next_open(&self, error: TransportError) {
        self.state.open_failures.lock().push_back(error);
    }

    /// While set, `open` never completes
    pub fn hold_opens(&self, hold: bool) {
        self.state.hold_opens.store(hold, Ordering::SeqCst);
    }

    /// URLs of every `open` call, failed ones included
    pub fn attempts(&self) -> Vec<String> {
        self.state.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.attempts.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// The `index`-th opened connection (0-based)
    pub fn connection(&self, index: usize) -> Option<MockConnection> {
        self.state.connections.lock().get(index).cloned()
    }

    pub fn last_connection(&self) -> Option<MockConnection> {
        self.state.connections.lock().last().cloned()
    }

    /// Wait until `count` connections have been opened and return the last
    pub async fn wait_for_connection(&self, count: usize, max_wait: Duration) -> Option<MockConnection> {
        let opened = wait_until(|| self.connection_count() >= count, max_wait).await;
        if !opened {
            return None;
        }
        count.checked_sub(1).and_then(|index| self.connection(index))
    }
}

#[async_trait]
impl SocketTransport for MockTransport {
    async fn open(
        &self,
        url: &str,
    ) -> ortc_transport::Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)> {
        self.state.attempts.lock().push(url.to_string());

        let failure = self.state.open_failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        if self.state.hold_opens.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = MockConnection {
            url: url.to_string(),
            server: tx,
            shared: Arc::new(SocketShared {
                connected: AtomicBool::new(true),
                ..Default::default()
            }),
        };
        let _ = connection.server.send(TransportEvent::Opened);
        self.state.connections.lock().push(connection.clone());

        Ok((
            Arc::new(MockSender {
                connection: connection.clone(),
            }),
            Box::new(MockReceiver { events: rx }),
        ))
    }
}

#[derive(Default)]
struct SocketShared {
    connected: AtomicBool,
    closed_by_client: AtomicBool,
    sent: Mutex<Vec<String>>,
    send_error: Mutex<Option<TransportError>>,
}

/// Server side of one mock socket
#[derive(Clone)]
pub struct MockConnection {
    url: String,
    server: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<SocketShared>,
}

impl MockConnection {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a raw text frame to the client
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.server.send(TransportEvent::Message(frame.into()));
    }

    /// Send the `o` frame that prompts the client to validate
    pub fn open(&self) {
        self.push(OPEN_FRAME);
    }

    /// Accept the session without a permission table
    pub fn validate(&self) {
        self.push(frames::validated(None, 1800));
    }

    /// Accept the session with a permission table
    pub fn validate_with(&self, permissions: &[(&str, &str)]) {
        self.push(frames::validated(Some(permissions), 1800));
    }

    /// Open then validate, the usual handshake
    pub fn handshake(&self) {
        self.open();
        self.validate();
    }

    pub fn subscribed(&self, channel: &str) {
        self.push(frames::subscribed(channel));
    }

    pub fn unsubscribed(&self, channel: &str) {
        self.push(frames::unsubscribed(channel));
    }

    pub fn data(&self, channel: &str, message: &str) {
        self.push(frames::data(channel, message));
    }

    pub fn server_error(&self, op: &str, channel: Option<&str>, message: &str) {
        self.push(frames::error(op, channel, message));
    }

    /// Raise a socket-level error without closing
    pub fn socket_error(&self, message: &str) {
        let _ = self.server.send(TransportEvent::Error(message.to_string()));
    }

    /// Drop the socket from the server side
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.server.send(TransportEvent::Closed {
            reason: Some("closed by server".to_string()),
        });
    }

    /// Make every following client write fail with `error`
    pub fn fail_sends_with(&self, error: TransportError) {
        *self.shared.send_error.lock() = Some(error);
    }

    /// Frames the client wrote, in order
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().clone()
    }

    /// Written frames starting with `prefix`
    pub fn sent_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.shared
            .sent
            .lock()
            .iter()
            .filter(|frame| frame.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.shared.sent.lock().clear();
    }

    /// Wait until the client wrote `count` frames starting with `prefix`
    pub async fn wait_for_sent(&self, prefix: &str, count: usize, max_wait: Duration) -> bool {
        wait_until(|| self.sent_with_prefix(prefix).len() >= count, max_wait).await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the client closed this socket
    pub fn was_closed_by_client(&self) -> bool {
        self.shared.closed_by_client.load(Ordering::SeqCst)
    }
}

struct MockSender {
    connection: MockConnection,
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, text: String) -> ortc_transport::Result<()> {
        let shared = &self.connection.shared;
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let injected = shared.send_error.lock().clone();
        if let Some(error) = injected {
            return Err(error);
        }
        shared.sent.lock().push(text);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    async fn close(&self) -> ortc_transport::Result<()> {
        let shared = &self.connection.shared;
        shared.closed_by_client.store(true, Ordering::SeqCst);
        if shared.connected.swap(false, Ordering::SeqCst) {
            let _ = self.connection.server.send(TransportEvent::Closed { reason: None });
        }
        Ok(())
    }
}

struct MockReceiver {
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

// ============================================================================
// Mock HTTP Client
// ============================================================================

/// One request seen by [`MockHttpClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

type Scripted = ortc_transport::Result<HttpResponse>;

#[derive(Default)]
struct HttpState {
    responses: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// [`HttpClient`] answering from a script.
///
/// Queued responses are used first, then the fallback; with neither the
/// request fails.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    state: Arc<HttpState>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response
    pub fn push_response(&self, status: u16, body: &str) {
        self.state.responses.lock().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    /// Queue one failure
    pub fn push_error(&self, error: TransportError) {
        self.state.responses.lock().push_back(Err(error));
    }

    /// Answer every unscripted request with `status` and `body`
    pub fn respond_always(&self, status: u16, body: &str) {
        *self.state.fallback.lock() = Some(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    /// Fail every unscripted request with `error`
    pub fn fail_always(&self, error: TransportError) {
        *self.state.fallback.lock() = Some(Err(error));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    fn answer(&self, request: RecordedRequest) -> Scripted {
        self.state.requests.lock().push(request);
        if let Some(scripted) = self.state.responses.lock().pop_front() {
            return scripted;
        }
        self.state
            .fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(TransportError::Http("no scripted response".to_string())))
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, timeout: Duration) -> ortc_transport::Result<HttpResponse> {
        self.answer(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            body: None,
            headers: Vec::new(),
            timeout,
        })
    }

    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> ortc_transport::Result<HttpResponse> {
        self.answer(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            body: Some(body),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout,
        })
    }
}

// ============================================================================
// Recorders
// ============================================================================

/// Records every [`ClientEvent`] a client raises
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder registered on `client`
    pub fn attach(client: &OrtcClient) -> Self {
        let recorder = Self::new();
        client.on_event(recorder.callback());
        recorder
    }

    /// Callback to register as an event handler
    pub fn callback(&self) -> impl Fn(&ClientEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &ClientEvent| events.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    /// Occurrences of exactly `event`
    pub fn count_of(&self, event: &ClientEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Errors raised through `Exception` events
    pub fn exceptions(&self) -> Vec<ClientError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Exception(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether some exception's message contains `text`
    pub fn has_exception_containing(&self, text: &str) -> bool {
        self.exceptions().iter().any(|e| e.to_string().contains(text))
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until `event` was seen `count` times
    pub async fn wait_for(&self, event: &ClientEvent, count: usize, max_wait: Duration) -> bool {
        wait_until(|| self.count_of(event) >= count, max_wait).await
    }

    /// Wait until an exception containing `text` was raised
    pub async fn wait_for_exception(&self, text: &str, max_wait: Duration) -> bool {
        wait_until(|| self.has_exception_containing(text), max_wait).await
    }
}

/// Collects `(channel, message)` pairs delivered to a subscription handler
#[derive(Clone, Default)]
pub struct MessageCollector {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler to pass to `subscribe`
    pub fn handler(&self) -> impl Fn(&str, &str) + Send + Sync + 'static {
        let messages = self.messages.clone();
        move |channel: &str, message: &str| {
            messages.lock().push((channel.to_string(), message.to_string()))
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }

    pub async fn wait_for_count(&self, count: usize, max_wait: Duration) -> bool {
        wait_until(|| self.count() >= count, max_wait).await
    }
}

// ============================================================================
// Client Fixtures
// ============================================================================

/// A client wired to mock transports
pub struct TestClient {
    pub client: OrtcClient,
    pub transport: MockTransport,
    pub http: MockHttpClient,
    pub events: EventRecorder,
}

impl TestClient {
    /// Client for `http://ortc.test:80` with a short reconnect interval
    pub fn new() -> Self {
        Self::with_builder(|builder| builder)
    }

    /// Client configured by `configure` on top of the defaults
    pub fn with_builder<F>(configure: F) -> Self
    where
        F: FnOnce(ortc_client::OrtcBuilder) -> ortc_client::OrtcBuilder,
    {
        let transport = MockTransport::new();
        let http = MockHttpClient::new();
        let builder = OrtcClient::builder()
            .url("http://ortc.test:80")
            .reconnect_interval(Duration::from_millis(100))
            .transport(Arc::new(transport.clone()))
            .http_client(Arc::new(http.clone()));

        let client = match configure(builder).build() {
            Ok(client) => client,
            Err(e) => panic!("test client failed to build: {}", e),
        };
        let events = EventRecorder::attach(&client);

        Self {
            client,
            transport,
            http,
            events,
        }
    }

    /// Connect and complete the handshake on the first socket
    pub async fn connected() -> (Self, MockConnection) {
        let fixture = Self::new();
        let connection = fixture.connect().await;
        (fixture, connection)
    }

    /// Connect with `key1`/`tok1`, complete the handshake and wait for it
    pub async fn connect(&self) -> MockConnection {
        self.connect_with(None).await
    }

    /// Same as [`connect`](Self::connect) with a permission table
    pub async fn connect_with(&self, permissions: Option<&[(&str, &str)]>) -> MockConnection {
        let expected = self.transport.connection_count() + 1;
        if let Err(e) = self.client.connect("key1", "tok1") {
            panic!("connect failed: {}", e);
        }
        let connection = match self.transport.wait_for_connection(expected, DEFAULT_TIMEOUT).await {
            Some(connection) => connection,
            None => panic!("no socket was opened"),
        };
        connection.open();
        match permissions {
            Some(permissions) => connection.validate_with(permissions),
            None => connection.validate(),
        }
        if let Err(e) = self.client.wait_until_connected(DEFAULT_TIMEOUT).await {
            panic!("client did not connect: {}", e);
        }
        connection
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}
