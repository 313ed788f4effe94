//! ORTC client: connection state machine, subscriptions and delivery
//!
//! One [`OrtcClient`] owns one logical session. Socket events are handled by
//! a reader task per connection attempt; every attempt carries a generation
//! number, and events from a superseded attempt are ignored. All transitions
//! run under the session mutex, events are emitted after it is released.
//!
//! Lock order: session, then config, then the registry.

use ortc_core::{
    build_parts,
    codec::{self, Command, Inbound, Operation, ServerError},
    generate_id,
    validation::{check_channel_size, check_metadata_size, is_valid_input, is_valid_url, validate_required},
    MultiPartReassembler, Part, Permissions, SESSION_ID_LENGTH,
};
use ortc_transport::{HttpClient, SocketTransport, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::builder::OrtcBuilder;
use crate::cluster::ClusterResolver;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, HandlerId};
use crate::registry::{MessageHandler, SubscriptionRegistry};
use crate::timer::TaskTimer;

/// Where the session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// First attempt in flight (socket open or validation pending)
    Connecting,
    /// Validated by the server
    Connected,
    /// The connection dropped; an attempt is scheduled or in flight
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

#[derive(Default)]
struct Session {
    state: ConnectionState,
    /// Bumped whenever the current socket is abandoned
    generation: u64,
    app_key: String,
    auth_token: String,
    session_id: String,
    url: String,
    already_connected_once: bool,
    forced_closed: bool,
    waiting_server_response: bool,
    session_expiration: Option<u32>,
    permissions: Permissions,
    outbound: Option<mpsc::UnboundedSender<String>>,
    writer: Option<JoinHandle<()>>,
}

struct Inner {
    client_id: String,
    config: RwLock<ClientConfig>,
    session: Mutex<Session>,
    registry: SubscriptionRegistry,
    reassembler: MultiPartReassembler,
    events: EventBus,
    transport: Arc<dyn SocketTransport>,
    http: Arc<dyn HttpClient>,
    /// Writer of the last socket closed by `disconnect`, still flushing
    flushing: Mutex<Option<JoinHandle<()>>>,
    heartbeat: TaskTimer,
    reconnect: TaskTimer,
    watchdog: TaskTimer,
    state_tx: watch::Sender<ConnectionState>,
}

/// An ORTC client.
///
/// Cheap to clone; clones share the session. Operations are non-blocking:
/// they validate, queue frames for the socket and return. Every failure is
/// both returned and reported through [`ClientEvent::Exception`].
#[derive(Clone)]
pub struct OrtcClient {
    inner: Arc<Inner>,
}

impl OrtcClient {
    /// Create a client over explicit transports (use [`OrtcClient::builder`]
    /// for the defaults)
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn SocketTransport>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                client_id: uuid::Uuid::new_v4().to_string(),
                config: RwLock::new(config),
                session: Mutex::new(Session::default()),
                registry: SubscriptionRegistry::new(),
                reassembler: MultiPartReassembler::new(),
                events: EventBus::new(),
                transport,
                http,
                flushing: Mutex::new(None),
                heartbeat: TaskTimer::new("heartbeat"),
                reconnect: TaskTimer::new("reconnect"),
                watchdog: TaskTimer::new("connect watchdog"),
                state_tx,
            }),
        }
    }

    /// Create a builder
    pub fn builder() -> OrtcBuilder {
        OrtcBuilder::new()
    }

    // ------------------------------------------------------------------
    // Configuration and observation
    // ------------------------------------------------------------------

    /// Snapshot of the configuration
    pub fn config(&self) -> ClientConfig {
        self.inner.config.read().clone()
    }

    /// Change the configuration; takes effect on the next connect attempt
    pub fn configure<F>(&self, f: F)
    where
        F: FnOnce(&mut ClientConfig),
    {
        f(&mut self.inner.config.write());
    }

    /// Register an event observer
    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Remove an event observer
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    /// Identifier of this client instance, fixed for its lifetime
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Session id sent with the last validate, if a socket is up
    pub fn session_id(&self) -> Option<String> {
        let session = self.inner.session.lock();
        (!session.session_id.is_empty()).then(|| session.session_id.clone())
    }

    /// Server URL of the current or last attempt (resolved in cluster mode)
    pub fn url(&self) -> Option<String> {
        let session = self.inner.session.lock();
        (!session.url.is_empty()).then(|| session.url.clone())
    }

    /// Session expiration in minutes announced by the server
    pub fn session_expiration(&self) -> Option<u32> {
        self.inner.session.lock().session_expiration
    }

    /// Permission table received at validation
    pub fn permissions(&self) -> Permissions {
        self.inner.session.lock().permissions.clone()
    }

    /// Channels currently tracked (subscribing or subscribed)
    pub fn channels(&self) -> Vec<String> {
        self.inner.registry.channels()
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Start connecting. Returns once the attempt is scheduled; completion
    /// is reported with [`ClientEvent::Connected`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, app_key: &str, auth_token: &str) -> Result<()> {
        let result = self.inner.start_connect(app_key, auth_token);
        self.report(result)
    }

    /// Wait until the server validates the session.
    ///
    /// Fails with `Timeout` after `timeout`, or `NotConnected` when the
    /// client is (or falls back to) disconnected.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = tokio::time::timeout(timeout, async move {
            rx.wait_for(|state| {
                matches!(state, ConnectionState::Connected | ConnectionState::Disconnected)
            })
            .await
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected)
        })
        .await;

        match settled {
            Ok(ConnectionState::Connected) => Ok(()),
            Ok(_) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout(
                "the server did not validate the connection in time".to_string(),
            )),
        }
    }

    /// [`connect`](Self::connect) then [`wait_until_connected`](Self::wait_until_connected)
    pub async fn connect_and_wait(
        &self,
        app_key: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.connect(app_key, auth_token)?;
        self.wait_until_connected(timeout).await
    }

    /// Close the session, cancelling any pending reconnect.
    pub fn disconnect(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock();
            if session.state == ConnectionState::Disconnected {
                drop(session);
                return self.report(Err(ClientError::NotConnected));
            }
            session.forced_closed = true;
        }
        self.inner.finish_disconnect();
        Ok(())
    }

    /// [`disconnect`](Self::disconnect), then wait until the frames queued
    /// before it have been written and the socket is closed.
    pub async fn disconnect_and_wait(&self, timeout: Duration) -> Result<()> {
        self.disconnect()?;
        let writer = self.inner.flushing.lock().take();
        let Some(writer) = writer else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, writer).await {
            Ok(_) => Ok(()),
            Err(_) => self.report(Err(ClientError::Timeout(
                "queued frames were not flushed before the socket closed".to_string(),
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Subscribe to `channel`, resubscribing automatically after reconnects
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Result<()>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.subscribe_with(channel, true, handler)
    }

    /// Subscribe to `channel`; `handler` receives `(channel, message)`
    pub fn subscribe_with<F>(
        &self,
        channel: &str,
        resubscribe_on_reconnect: bool,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let result = self
            .inner
            .try_subscribe(channel, resubscribe_on_reconnect, Arc::new(handler));
        self.report(result)
    }

    /// Unsubscribe from a subscribed channel
    pub fn unsubscribe(&self, channel: &str) -> Result<()> {
        let result = self.inner.try_unsubscribe(channel);
        self.report(result)
    }

    /// Whether the server acknowledged the subscription to `channel`.
    ///
    /// Reports an exception (and returns `false`) when not connected or for
    /// an invalid channel name.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        let checked = {
            let session = self.inner.session.lock();
            require_connected(&session).and_then(|_| require_channel(channel))
        };
        match self.report(checked) {
            Ok(()) => self.inner.registry.is_subscribed(channel),
            Err(_) => false,
        }
    }

    /// Publish `message` on `channel`, split into parts as needed
    pub fn send(&self, channel: &str, message: &str) -> Result<()> {
        let result = self.inner.try_send(channel, message);
        self.report(result)
    }

    /// Publish on behalf of another application key, authorised by its
    /// private key
    pub fn send_proxy(
        &self,
        app_key: &str,
        private_key: &str,
        channel: &str,
        message: &str,
    ) -> Result<()> {
        let result = self
            .inner
            .try_send_proxy(app_key, private_key, channel, message);
        self.report(result)
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.inner.exception(e.clone());
        }
        result
    }
}

impl std::fmt::Debug for OrtcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtcClient")
            .field("client_id", &self.inner.client_id)
            .field("state", &self.state())
            .finish()
    }
}

fn require_connected(session: &Session) -> Result<()> {
    if session.state != ConnectionState::Connected {
        return Err(ClientError::NotConnected);
    }
    Ok(())
}

fn require_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(ClientError::InvalidArguments(
            "Channel is null or empty".to_string(),
        ));
    }
    if !is_valid_input(channel) {
        return Err(ClientError::InvalidArguments(
            "Channel has invalid characters".to_string(),
        ));
    }
    Ok(())
}

fn require_message(message: &str) -> Result<()> {
    if message.is_empty() {
        return Err(ClientError::InvalidArguments(
            "Message is null or empty".to_string(),
        ));
    }
    Ok(())
}

fn queue(session: &Session, frame: String) -> Result<()> {
    session
        .outbound
        .as_ref()
        .ok_or(ClientError::NotConnected)?
        .send(frame)
        .map_err(|_| ClientError::NotConnected)
}

impl Inner {
    fn exception(&self, error: ClientError) {
        debug!("Exception: {}", error);
        self.events.emit(&ClientEvent::Exception(error));
    }

    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        if session.state != state {
            trace!("State {:?} -> {:?}", session.state, state);
        }
        session.state = state;
        self.state_tx.send_replace(state);
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    fn start_connect(self: &Arc<Self>, app_key: &str, auth_token: &str) -> Result<()> {
        let config = self.config.read().clone();

        {
            let session = self.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
        }

        if config.url.is_empty() && config.cluster_url.is_empty() {
            return Err(ClientError::InvalidArguments(
                "URL and Cluster URL are null or empty".to_string(),
            ));
        }
        validate_required(app_key, "Application Key")?;
        validate_required(auth_token, "Authentication Token")?;
        if !is_valid_url(config.target_url()) {
            let what = if config.is_cluster { "Invalid Cluster URL" } else { "Invalid URL" };
            return Err(ClientError::InvalidArguments(what.to_string()));
        }
        if !is_valid_input(&config.announcement_sub_channel) {
            return Err(ClientError::InvalidArguments(
                "Announcement Subchannel has invalid characters".to_string(),
            ));
        }
        check_metadata_size(&config.connection_metadata)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::ConnectionError("connect requires a tokio runtime".to_string())
        })?;

        let generation = {
            let mut session = self.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            session.forced_closed = false;
            session.app_key = app_key.to_string();
            session.auth_token = auth_token.to_string();
            session.generation += 1;
            self.set_state(&mut session, ConnectionState::Connecting);
            session.generation
        };

        info!("Connecting to {}", config.target_url());
        runtime.spawn(Self::run_attempt(self.clone(), generation));
        Ok(())
    }

    fn try_subscribe(
        &self,
        channel: &str,
        resubscribe_on_reconnect: bool,
        handler: MessageHandler,
    ) -> Result<()> {
        let session = self.session.lock();
        require_connected(&session)?;
        require_channel(channel)?;
        check_channel_size(channel)?;

        if let Some(existing) = self.registry.get(channel) {
            if existing.is_subscribing {
                return Err(ClientError::AlreadySubscribed(format!(
                    "Already subscribing to the channel {}",
                    channel
                )));
            }
            if existing.is_subscribed {
                return Err(ClientError::AlreadySubscribed(format!(
                    "Already subscribed to the channel {}",
                    channel
                )));
            }
        }

        let hash = session.permissions.authorize(channel).ok_or_else(|| {
            ClientError::PermissionDenied(format!(
                "No permission found to subscribe to the channel '{}'",
                channel
            ))
        })?;

        let frame = codec::encode(&Command::Subscribe {
            app_key: &session.app_key,
            auth_token: &session.auth_token,
            channel,
            hash: &hash,
        });

        self.registry.add(channel, resubscribe_on_reconnect, handler);
        if let Err(e) = queue(&session, frame) {
            self.registry.remove(channel);
            return Err(e);
        }

        debug!("Subscribing to {}", channel);
        Ok(())
    }

    fn try_unsubscribe(&self, channel: &str) -> Result<()> {
        let session = self.session.lock();
        require_connected(&session)?;
        require_channel(channel)?;
        check_channel_size(channel)?;

        if !self.registry.is_subscribed(channel) {
            return Err(ClientError::NotSubscribed(format!(
                "Not subscribed to the channel {}",
                channel
            )));
        }

        let frame = codec::encode(&Command::Unsubscribe {
            app_key: &session.app_key,
            channel,
        });
        queue(&session, frame)?;
        self.registry.set_resubscribe(channel, false);

        debug!("Unsubscribing from {}", channel);
        Ok(())
    }

    fn try_send(&self, channel: &str, message: &str) -> Result<()> {
        let session = self.session.lock();
        require_connected(&session)?;
        require_channel(channel)?;
        require_message(message)?;
        check_channel_size(channel)?;

        let hash = session.permissions.authorize(channel).ok_or_else(|| {
            ClientError::PermissionDenied(format!(
                "No permission found to send to the channel '{}'",
                channel
            ))
        })?;

        let parts = build_parts(channel, message);
        for part in &parts {
            let frame = codec::encode(&Command::Send {
                app_key: &session.app_key,
                auth_token: &session.auth_token,
                channel,
                hash: &hash,
                part,
            });
            queue(&session, frame)?;
        }

        trace!("Queued {} part(s) for {}", parts.len(), channel);
        Ok(())
    }

    fn try_send_proxy(
        &self,
        app_key: &str,
        private_key: &str,
        channel: &str,
        message: &str,
    ) -> Result<()> {
        let session = self.session.lock();
        require_connected(&session)?;
        validate_required(app_key, "Application Key")?;
        validate_required(private_key, "Private Key")?;
        require_channel(channel)?;
        require_message(message)?;
        check_channel_size(channel)?;

        let parts = build_parts(channel, message);
        for part in &parts {
            let frame = codec::encode(&Command::SendProxy {
                app_key,
                private_key,
                channel,
                part,
            });
            queue(&session, frame)?;
        }

        trace!("Queued {} proxy part(s) for {}", parts.len(), channel);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection attempts
    // ------------------------------------------------------------------

    async fn run_attempt(self: Arc<Self>, generation: u64) {
        let config = self.config.read().clone();
        let app_key = {
            let session = self.session.lock();
            if session.generation != generation {
                return;
            }
            session.app_key.clone()
        };

        let url = if config.is_cluster {
            let resolver =
                ClusterResolver::new(self.http.clone()).with_timeout(config.connection_timeout());
            match resolver.resolve(&config.cluster_url, &app_key).await {
                Ok(url) => url,
                Err(e) => {
                    debug!("Cluster lookup failed: {}", e);
                    self.attempt_failed(
                        generation,
                        ClientError::ConnectionError(
                            "Connection Failed. Unable to get URL from cluster".to_string(),
                        ),
                    );
                    return;
                }
            }
        } else {
            config.url.clone()
        };

        {
            let mut session = self.session.lock();
            if session.generation != generation {
                return;
            }
            session.url = url.clone();
            session.waiting_server_response = true;
        }

        let timeout = config.connection_timeout();
        self.arm_watchdog(generation, timeout);

        debug!("Opening socket to {}", url);
        let (sender, receiver) = match tokio::time::timeout(timeout, self.transport.open(&url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.attempt_failed(
                    generation,
                    ClientError::ConnectionError(format!("Connection Failed. {}", e)),
                );
                return;
            }
            Err(_) => {
                self.attempt_timed_out(generation);
                return;
            }
        };

        let started = {
            let mut session = self.session.lock();
            if session.generation != generation {
                false
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                session.outbound = Some(tx);
                session.writer = Some(tokio::spawn(write_loop(
                    Arc::downgrade(&self),
                    generation,
                    sender.clone(),
                    rx,
                )));
                true
            }
        };

        if !started {
            // Superseded while the socket was opening
            let _ = sender.close().await;
            return;
        }

        self.read_loop(generation, receiver).await;
    }

    async fn read_loop(self: &Arc<Self>, generation: u64, mut receiver: Box<dyn TransportReceiver>) {
        while let Some(event) = receiver.recv().await {
            if self.session.lock().generation != generation {
                return;
            }
            match event {
                TransportEvent::Opened => debug!("Socket open"),
                TransportEvent::Message(text) => self.handle_frame(generation, &text),
                TransportEvent::Error(e) => {
                    warn!("Socket error: {}", e);
                    self.exception(ClientError::ConnectionError(e));
                }
                TransportEvent::Closed { reason } => {
                    info!("Socket closed: {}", reason.as_deref().unwrap_or("no reason"));
                    self.connection_lost(generation);
                    return;
                }
            }
        }
        self.connection_lost(generation);
    }

    /// Abandon the socket of `generation`. Dropping the queue lets its writer
    /// flush and close the socket. Returns `false` when that attempt was
    /// already superseded.
    fn teardown(self: &Arc<Self>, generation: u64, report_handled: bool) -> bool {
        {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            session.generation += 1;
            session.outbound = None;
            session.writer = None;
            if report_handled {
                session.waiting_server_response = false;
            }
        }

        self.heartbeat.stop();
        self.watchdog.stop();
        true
    }

    fn attempt_failed(self: &Arc<Self>, generation: u64, error: ClientError) {
        if self.teardown(generation, true) {
            self.exception(error);
            self.reconnect_or_disconnect();
        }
    }

    fn attempt_timed_out(self: &Arc<Self>, generation: u64) {
        {
            let session = self.session.lock();
            if session.generation != generation || session.state == ConnectionState::Connected {
                return;
            }
        }
        warn!("Connection attempt timed out");
        self.attempt_failed(
            generation,
            ClientError::Timeout("the server did not validate the connection in time".to_string()),
        );
    }

    fn connection_lost(self: &Arc<Self>, generation: u64) {
        if self.teardown(generation, false) {
            self.reconnect_or_disconnect();
        }
    }

    fn reconnect_or_disconnect(self: &Arc<Self>) {
        let forced = self.session.lock().forced_closed;
        let enabled = self.config.read().enable_reconnect;
        if !forced && enabled {
            self.schedule_reconnect();
        } else {
            self.finish_disconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        {
            let mut session = self.session.lock();
            if session.forced_closed || session.state == ConnectionState::Disconnected {
                return;
            }
            self.set_state(&mut session, ConnectionState::Reconnecting);
        }

        let delay = self.config.read().reconnect_interval();
        info!("Reconnecting in {:?}", delay);

        let weak = Arc::downgrade(self);
        self.reconnect.start_once(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_reconnect_timer();
            }
        });
    }

    fn on_reconnect_timer(self: &Arc<Self>) {
        let (generation, unanswered) = {
            let mut session = self.session.lock();
            if session.forced_closed || session.state != ConnectionState::Reconnecting {
                return;
            }
            session.generation += 1;
            (
                session.generation,
                std::mem::take(&mut session.waiting_server_response),
            )
        };

        if unanswered {
            self.exception(ClientError::ConnectionError("Unable to connect".to_string()));
        }

        self.events.emit(&ClientEvent::Reconnecting);
        tokio::spawn(Self::run_attempt(self.clone(), generation));
    }

    fn arm_watchdog(self: &Arc<Self>, generation: u64, timeout: Duration) {
        let weak = Arc::downgrade(self);
        self.watchdog.start_once(timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.attempt_timed_out(generation);
            }
        });
    }

    /// Reset the session and raise `Disconnected`, once
    fn finish_disconnect(self: &Arc<Self>) {
        let writer = {
            let mut session = self.session.lock();
            if session.state == ConnectionState::Disconnected {
                return;
            }
            session.generation += 1;
            session.outbound = None;
            session.permissions.clear();
            session.waiting_server_response = false;
            session.already_connected_once = false;
            session.session_id.clear();
            self.set_state(&mut session, ConnectionState::Disconnected);
            self.registry.clear();
            session.writer.take()
        };

        self.reconnect.stop();
        self.heartbeat.stop();
        self.watchdog.stop();
        self.reassembler.clear();

        if writer.is_some() {
            *self.flushing.lock() = writer;
        }

        info!("Disconnected");
        self.events.emit(&ClientEvent::Disconnected);
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    fn handle_frame(self: &Arc<Self>, generation: u64, text: &str) {
        match codec::decode(text) {
            Ok(Inbound::Open) => self.send_validate(generation),
            Ok(Inbound::Heartbeat) => trace!("Heartbeat acknowledged"),
            Ok(Inbound::Operation(operation)) => self.handle_operation(generation, operation),
            Ok(Inbound::Close { code, reason }) => {
                debug!("Server close frame {:?}: {}", code, reason)
            }
            Ok(Inbound::Data { channel, message }) => self.deliver(&channel, &message),
            Err(e @ ortc_core::Error::UnknownOperation { .. }) => {
                warn!("{}", e);
                self.exception(e.into());
                {
                    self.session.lock().forced_closed = true;
                }
                self.finish_disconnect();
            }
            Err(_) => {
                warn!("Unknown message received");
                self.exception(ClientError::Protocol(format!(
                    "Unknown message received: {}",
                    text
                )));
            }
        }
    }

    fn send_validate(&self, generation: u64) {
        let mut session = self.session.lock();
        if session.generation != generation {
            return;
        }
        session.session_id = generate_id(SESSION_ID_LENGTH);

        let frame = {
            let config = self.config.read();
            codec::encode(&Command::Validate {
                app_key: &session.app_key,
                auth_token: &session.auth_token,
                announcement_sub_channel: &config.announcement_sub_channel,
                session_id: &session.session_id,
                metadata: &config.connection_metadata,
                heartbeat: config.heartbeat(),
            })
        };

        debug!("Validating session {}", session.session_id);
        if queue(&session, frame).is_err() {
            debug!("Socket gone before validate could be sent");
        }
    }

    fn handle_operation(self: &Arc<Self>, generation: u64, operation: Operation) {
        match operation {
            Operation::Validated {
                permissions,
                session_expiration,
                busy,
            } => self.on_validated(generation, permissions, session_expiration, busy),
            Operation::Subscribed { channel } => {
                self.registry.mark_subscribed(&channel);
                info!("Subscribed to {}", channel);
                self.events.emit(&ClientEvent::Subscribed(channel));
            }
            Operation::Unsubscribed { channel } => {
                self.registry.remove(&channel);
                info!("Unsubscribed from {}", channel);
                self.events.emit(&ClientEvent::Unsubscribed(channel));
            }
            Operation::Error(error) => self.on_server_error(generation, error),
        }
    }

    fn on_validated(
        self: &Arc<Self>,
        generation: u64,
        permissions: Option<Permissions>,
        session_expiration: Option<u32>,
        busy: bool,
    ) {
        let (event, heartbeat) = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return;
            }

            if let Some(permissions) = permissions {
                session.permissions = permissions;
            }
            if session_expiration.is_some() {
                session.session_expiration = session_expiration;
            }
            session.waiting_server_response = false;

            let reconnected = session.already_connected_once;
            session.already_connected_once = true;
            self.set_state(&mut session, ConnectionState::Connected);
            self.watchdog.stop();
            if !busy || !reconnected {
                self.reconnect.stop();
            }

            let heartbeat = self.config.read().heartbeat_active;

            if reconnected {
                for channel in self.registry.retain_for_resubscribe() {
                    let hash = session.permissions.authorize(&channel).unwrap_or_default();
                    let frame = codec::encode(&Command::Subscribe {
                        app_key: &session.app_key,
                        auth_token: &session.auth_token,
                        channel: &channel,
                        hash: &hash,
                    });
                    debug!("Resubscribing to {}", channel);
                    let _ = queue(&session, frame);
                }
                self.reassembler.clear();
                (ClientEvent::Reconnected, heartbeat)
            } else {
                self.registry.clear();
                (ClientEvent::Connected, heartbeat)
            }
        };

        if heartbeat {
            self.start_heartbeat();
        }

        info!("Session validated ({:?})", event);
        self.events.emit(&event);
    }

    fn on_server_error(self: &Arc<Self>, generation: u64, error: ServerError) {
        let ServerError {
            op,
            channel,
            message,
        } = error;
        warn!("Server error for {:?}: {}", op, message);
        self.exception(ClientError::Server(message.clone()));

        match op.as_deref() {
            Some("validate") => {
                if message.contains("Unable to connect") || message.contains("Server is too busy") {
                    self.connection_lost(generation);
                } else {
                    self.session.lock().forced_closed = true;
                    self.finish_disconnect();
                }
            }
            Some("subscribe") => {
                if let Some(channel) = channel {
                    self.registry.clear_subscribing(&channel);
                }
            }
            Some("subscribe_maxsize") | Some("unsubscribe_maxsize") | Some("send_maxsize") => {
                if let Some(channel) = channel {
                    self.registry.clear_subscribing(&channel);
                }
                self.session.lock().forced_closed = true;
                self.finish_disconnect();
            }
            _ => {}
        }
    }

    fn deliver(&self, channel: &str, message: &str) {
        let Some(handler) = self.registry.handler(channel) else {
            trace!("Dropping message for untracked channel {}", channel);
            return;
        };

        let complete = match Part::parse(message) {
            Some(part) => self.reassembler.feed_part(&part),
            None => Some(message.to_string()),
        };

        if let Some(full) = complete {
            if !full.is_empty() {
                handler(channel, &full);
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    fn start_heartbeat(self: &Arc<Self>) {
        let interval = self.config.read().heartbeat_interval();
        let weak = Arc::downgrade(self);
        self.heartbeat.start_repeating(interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.send_heartbeat();
            }
        });
    }

    fn send_heartbeat(&self) {
        let session = self.session.lock();
        if session.state == ConnectionState::Connected
            && queue(&session, codec::encode(&Command::Heartbeat)).is_err()
        {
            trace!("Heartbeat skipped, socket gone");
        }
    }
}

/// Drain the outbound queue of one socket
async fn write_loop(
    inner: Weak<Inner>,
    generation: u64,
    sender: Arc<dyn TransportSender>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sender.send(frame).await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if e.is_not_connected() {
                inner.exception(ClientError::Transport(e));
                inner.connection_lost(generation);
                break;
            }
            inner.exception(ClientError::ConnectionError(format!("Unable to send: {}", e)));
        }
    }

    // The queue is closed once the session lets go of this socket
    if let Err(e) = sender.close().await {
        if let Some(inner) = inner.upgrade() {
            inner.exception(ClientError::ConnectionError(format!(
                "Error disconnecting: {}",
                e
            )));
        }
    }
    trace!("Writer for attempt {} finished", generation);
}
