// file: src/client.rs
// description: self-healing WebSocket client for the Pantheon event stream

use crate::{
    auth::{TokenProvider, authenticated_url},
    backoff::Backoff,
    client_state::{ClientState, ConnectionState},
    codec::{self, Inbound},
    config::ClientConfig,
    dispatch::{EventRegistry, Subscription, Topic},
    error::{PantheonError, Result},
    events::{ClientEvent, EventReceiver, EventSender, create_event_channel},
    monitoring::{
        CONNECTED_GAUGE, EVENTS_COUNTER, HealthStatus, LISTENER_PANICS_COUNTER,
        MALFORMED_FRAMES_COUNTER, RECONNECT_COUNTER,
    },
    transport::{BoxTransport, Connector, TransportFrame, TungsteniteConnector},
    types::{ClientMessage, WebSocketEvent},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{
    fmt,
    future::{Future, pending},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until, timeout},
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Send(String),
    Shutdown,
}

struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

struct Shared {
    state: ClientState,
    driver: Option<DriverHandle>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    registry: EventRegistry,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle: EventSender,
}

// Dropped with the last `WebSocketClient` handle; the driver task only holds
// `Inner`, so this is what ends a session nobody can reach any more.
struct Owner {
    inner: Arc<Inner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let _ = self.inner.stop();
    }
}

/// Handle to one logical connection. Cheap to clone; all clones share the
/// same socket, state and listeners.
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

/// Non-owning handle from [`WebSocketClient::downgrade`]. Does not keep the
/// session alive.
#[derive(Clone)]
pub struct WeakClient {
    owner: Weak<Owner>,
}

impl WeakClient {
    /// `None` once every strong handle has been dropped.
    pub fn upgrade(&self) -> Option<WebSocketClient> {
        let owner = self.owner.upgrade()?;
        Some(WebSocketClient {
            inner: Arc::clone(&owner.inner),
            _owner: owner,
        })
    }
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &self.connection_state())
            .field("listeners", &self.inner.registry.len())
            .finish()
    }
}

impl WebSocketClient {
    pub fn new<C, T>(config: ClientConfig, connector: C, tokens: T) -> Self
    where
        C: Connector,
        T: TokenProvider,
    {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            config,
            connector: Arc::new(connector),
            tokens: Arc::new(tokens),
            registry: EventRegistry::new(),
            shared: Mutex::new(Shared {
                state: ClientState::new(),
                driver: None,
            }),
            state_tx,
            lifecycle: create_event_channel(),
        });

        Self {
            _owner: Arc::new(Owner {
                inner: Arc::clone(&inner),
            }),
            inner,
        }
    }

    /// Client dialling real endpoints through tokio-tungstenite.
    pub fn with_default_transport<T: TokenProvider>(config: ClientConfig, tokens: T) -> Result<Self> {
        Ok(Self::new(config, TungsteniteConnector::new()?, tokens))
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            owner: Arc::downgrade(&self._owner),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Starts a new session from `Disconnected` or `Error`. Returns whether a
    /// session was started: it is a no-op while one is already running or
    /// when no access token is available. Must be called inside a Tokio
    /// runtime.
    pub fn connect(&self) -> bool {
        if self.inner.tokens.access_token().is_none() {
            warn!("Not authenticated; skipping connect to {}", self.inner.config.url);
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("connect() called outside a Tokio runtime");
            return false;
        };

        let mut shared = self.inner.lock();
        if !shared.state.state.is_idle() {
            debug!(state = %shared.state.state, "connect() ignored, session already active");
            return false;
        }

        shared.state.session += 1;
        let session = shared.state.session;
        if !self.inner.apply(&mut shared, ConnectionState::Connecting) {
            return false;
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let driver = Driver {
            inner: Arc::clone(&self.inner),
            session,
            commands: receiver,
            backoff: Backoff::new(&self.inner.config.reconnect),
        };
        let task = runtime.spawn(driver.run());
        shared.driver = Some(DriverHandle { commands, task });

        info!(session, "Connecting to {}", self.inner.config.url);
        true
    }

    /// Ends the session: cancels pending reconnect and heartbeat timers,
    /// closes the socket, and moves to `Disconnected` without reconnecting.
    pub fn disconnect(&self) {
        if self.inner.stop().is_some() {
            info!("Disconnected from {}", self.inner.config.url);
        }
    }

    /// Like [`disconnect`](Self::disconnect), then waits for the socket to
    /// finish closing.
    pub async fn close(&self) {
        if let Some(task) = self.inner.stop() {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
            info!("Connection to {} closed", self.inner.config.url);
        }
    }

    /// Queues `message` on the live connection. While not `Connected` the
    /// message is dropped and `Ok(false)` returned; only serialization
    /// failures are errors.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool> {
        let text = codec::encode(message)?;
        let shared = self.inner.lock();

        if shared.state.state != ConnectionState::Connected {
            debug!(state = %shared.state.state, "Dropping outbound message while not connected");
            return Ok(false);
        }

        Ok(shared
            .driver
            .as_ref()
            .is_some_and(|driver| driver.commands.send(Command::Send(text)).is_ok()))
    }

    /// Registers `callback` for `topic`. Listeners survive reconnects and run
    /// on the connection task, in wire order.
    ///
    /// The registry is owned by the client, so a listener holding a
    /// `WebSocketClient` clone keeps the client alive forever and dropping
    /// the other handles no longer disconnects. Capture a
    /// [`WeakClient`] from [`downgrade`](Self::downgrade) instead.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&WebSocketEvent) + Send + Sync + 'static,
    {
        self.inner.registry.register(topic.into(), callback)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver holding the latest state; intermediate states may be
    /// coalesced. Use [`lifecycle_events`](Self::lifecycle_events) to see
    /// every transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Every state transition, scheduled reconnect, dropped frame and
    /// listener panic from now on.
    pub fn lifecycle_events(&self) -> EventReceiver {
        self.inner.lifecycle.subscribe()
    }

    /// Receipt time of the most recently dispatched event.
    pub fn last_event_time(&self) -> Option<chrono::DateTime<Utc>> {
        self.inner.lock().state.last_event_time
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.lock().state.connection_id.clone()
    }

    pub fn health(&self) -> HealthStatus {
        let listeners = self.inner.registry.len();
        let shared = self.inner.lock();
        let state = &shared.state;

        HealthStatus {
            is_healthy: state.state == ConnectionState::Connected,
            connection_state: state.state,
            connection_id: state.connection_id.clone(),
            last_event_time: state.last_event_time,
            total_events: state.total_events,
            malformed_frames: state.malformed_frames,
            reconnect_count: state.reconnect_count,
            listener_panics: state.listener_panics,
            listeners,
            uptime: state
                .connected_since
                .and_then(|since| chrono::Duration::from_std(since.elapsed()).ok())
                .unwrap_or_else(chrono::Duration::zero),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Caller holds the lock, so publication order matches transition order.
    fn apply(&self, shared: &mut Shared, next: ConnectionState) -> bool {
        let previous = shared.state.state;
        if !shared.state.transition(next) {
            warn!(from = %previous, to = %next, "Ignoring illegal connection state transition");
            return false;
        }

        self.state_tx.send_replace(next);
        self.publish(ClientEvent::StateChanged {
            from: previous,
            to: next,
        });
        CONNECTED_GAUGE.set(if next == ConnectionState::Connected { 1.0 } else { 0.0 });
        debug!(from = %previous, to = %next, "Connection state changed");
        true
    }

    fn publish(&self, event: ClientEvent) {
        // no receivers is fine
        let _ = self.lifecycle.send(event);
    }

    /// Transition on behalf of `session`; refused once the session is stale.
    fn transition(&self, session: u64, next: ConnectionState) -> bool {
        let mut shared = self.lock();
        if !shared.state.is_current(session) {
            return false;
        }
        let moved = self.apply(&mut shared, next);
        if moved && matches!(next, ConnectionState::Disconnected | ConnectionState::Error) {
            shared.driver = None;
        }
        moved
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        let mut shared = self.lock();
        shared.state.session += 1;
        if shared.state.state != ConnectionState::Disconnected {
            self.apply(&mut shared, ConnectionState::Disconnected);
        }

        let driver = shared.driver.take()?;
        let _ = driver.commands.send(Command::Shutdown);
        Some(driver.task)
    }

    fn endpoint(&self) -> Option<Url> {
        let token = self.tokens.access_token()?;
        Some(authenticated_url(
            &self.config.url,
            &self.config.token_param,
            &token,
        ))
    }

    fn deliver(&self, session: u64, event: &WebSocketEvent) {
        {
            let mut shared = self.lock();
            if !shared.state.is_current(session) {
                return;
            }
            shared.state.record_event(event.received_at);
        }
        EVENTS_COUNTER.increment(1);

        let report = self.registry.dispatch(event);
        trace!(
            event_type = event.event.type_name(),
            delivered = report.delivered,
            "Event dispatched"
        );

        if report.panicked > 0 {
            self.lock().state.listener_panics += report.panicked as u64;
            LISTENER_PANICS_COUNTER.increment(report.panicked as u64);
            self.publish(ClientEvent::ListenerPanicked {
                event_type: event.event.type_name().to_string(),
                count: report.panicked,
            });
        }
    }

    fn record_malformed(&self, reason: &PantheonError) {
        self.lock().state.record_malformed();
        MALFORMED_FRAMES_COUNTER.increment(1);
        self.publish(ClientEvent::MalformedFrame {
            reason: reason.to_string(),
        });
    }
}

// How a connection attempt, or the connection it produced, ended.
enum Outcome {
    Shutdown,
    Failed(PantheonError),
    Lost(PantheonError),
}

/// Owns the socket and every timer of one session.
struct Driver {
    inner: Arc<Inner>,
    session: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: Backoff,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(url) = self.inner.endpoint() else {
                warn!("Access token no longer available; giving up on reconnecting");
                self.inner
                    .transition(self.session, ConnectionState::Disconnected);
                return;
            };

            let delay = match self.attempt(url).await {
                Outcome::Shutdown => return,
                Outcome::Failed(e) => {
                    let delay = self.backoff.next_delay();
                    if self.backoff.exhausted() {
                        error!(
                            attempts = self.backoff.attempt(),
                            "Giving up after repeated connection failures: {}", e
                        );
                        self.inner.transition(self.session, ConnectionState::Error);
                        return;
                    }
                    warn!("Connection attempt failed: {}", e);
                    delay
                }
                Outcome::Lost(e) => {
                    warn!("Connection lost: {}", e);
                    self.backoff.next_delay()
                }
            };

            if !self
                .inner
                .transition(self.session, ConnectionState::Reconnecting)
            {
                return;
            }
            RECONNECT_COUNTER.increment(1);
            self.inner.publish(ClientEvent::ReconnectScheduled {
                attempt: self.backoff.attempt(),
                delay,
            });
            warn!(
                "Reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                self.backoff.attempt()
            );

            if self.unless_shutdown(sleep(delay)).await.is_none() {
                return;
            }
            if !self
                .inner
                .transition(self.session, ConnectionState::Connecting)
            {
                return;
            }
        }
    }

    /// Polls `future` unless a shutdown arrives first.
    async fn unless_shutdown<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        debug!("Dropping outbound message queued before the connection was lost");
                    }
                    Some(Command::Shutdown) | None => return None,
                },
                output = &mut future => return Some(output),
            }
        }
    }

    async fn attempt(&mut self, url: Url) -> Outcome {
        let connecting = timeout(
            self.inner.config.connect_timeout,
            self.inner.connector.connect(url),
        );

        let transport = match self.unless_shutdown(connecting).await {
            None => return Outcome::Shutdown,
            Some(Err(_elapsed)) => return Outcome::Failed(PantheonError::Timeout),
            Some(Ok(Err(e))) => return Outcome::Failed(e),
            Some(Ok(Ok(transport))) => transport,
        };

        if !self.inner.transition(self.session, ConnectionState::Connected) {
            return Outcome::Shutdown;
        }
        self.backoff.reset();
        info!(
            connection_id = self.inner.lock().state.connection_id.as_deref(),
            "WebSocket connection established to {}", self.inner.config.url
        );

        self.pump(transport).await
    }

    async fn pump(&mut self, mut transport: BoxTransport) -> Outcome {
        let heartbeat = self.inner.config.heartbeat.clone();
        let mut ticker = (!heartbeat.interval.is_zero()).then(|| {
            let mut ticker = interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut reply_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        trace!("Sending: {}", codec::preview(&text, 200));
                        if let Err(e) = transport.send(TransportFrame::Text(text)).await {
                            return Outcome::Lost(e);
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        close_gracefully(&mut transport).await;
                        return Outcome::Shutdown;
                    }
                },
                frame = transport.next() => {
                    reply_deadline = None;
                    match frame {
                        Some(Ok(frame)) => {
                            if let Err(e) = self.handle_frame(&mut transport, frame).await {
                                return Outcome::Lost(e);
                            }
                        }
                        Some(Err(e)) => return Outcome::Lost(e),
                        None => return Outcome::Lost(PantheonError::ConnectionClosed),
                    }
                }
                _ = wait_until(reply_deadline) => {
                    let _ = timeout(CLOSE_TIMEOUT, transport.close()).await;
                    return Outcome::Lost(PantheonError::HeartbeatTimeout {
                        secs: heartbeat.timeout.as_secs(),
                    });
                }
                _ = tick(&mut ticker) => {
                    let ping = match codec::encode(&ClientMessage::ping()) {
                        Ok(ping) => ping,
                        Err(e) => {
                            error!("Failed to encode heartbeat ping: {}", e);
                            continue;
                        }
                    };
                    trace!("Sending heartbeat ping");
                    if let Err(e) = transport.send(TransportFrame::Text(ping)).await {
                        return Outcome::Lost(e);
                    }
                    if reply_deadline.is_none() {
                        reply_deadline = Some(Instant::now() + heartbeat.timeout);
                    }
                }
            }
        }
    }

    // Err means the connection is gone.
    async fn handle_frame(
        &mut self,
        transport: &mut BoxTransport,
        frame: TransportFrame,
    ) -> Result<()> {
        match frame {
            TransportFrame::Text(text) => match codec::decode(&text, Utc::now()) {
                Ok(Inbound::Event(event)) => {
                    debug!(event_type = event.event.type_name(), "Received event");
                    self.inner.deliver(self.session, &event);
                }
                Ok(Inbound::Ping) => {
                    trace!("Heartbeat ping from server, replying");
                    let pong = codec::encode(&ClientMessage::pong())?;
                    transport.send(TransportFrame::Text(pong)).await?;
                }
                Ok(Inbound::Pong) => trace!("Heartbeat pong received"),
                Err(e) => {
                    warn!("Dropping malformed frame ({}): {}", e, codec::preview(&text, 100));
                    self.inner.record_malformed(&e);
                }
            },
            TransportFrame::Binary(data) => {
                debug!("Ignoring binary frame of {} bytes", data.len());
            }
            TransportFrame::Ping(data) => {
                transport.send(TransportFrame::Pong(data)).await?;
            }
            TransportFrame::Pong(_) => trace!("Received pong"),
            TransportFrame::Close => {
                info!("Server closed the connection");
                return Err(PantheonError::ConnectionClosed);
            }
        }
        Ok(())
    }
}

async fn close_gracefully(transport: &mut BoxTransport) {
    let closing = async {
        transport.send(TransportFrame::Close).await?;
        transport.close().await
    };
    match timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => debug!("Close handshake sent"),
        Ok(Err(e)) => debug!("Socket already gone while closing: {}", e),
        Err(_) => debug!("Timed out closing socket"),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::StaticToken, transport::MemoryConnector};

    fn client(connector: MemoryConnector, tokens: StaticToken) -> WebSocketClient {
        let config = ClientConfig::new(Url::parse("ws://pantheon.test/ws").unwrap());
        WebSocketClient::new(config, connector, tokens)
    }

    #[test]
    fn connect_outside_runtime_is_refused() {
        let (connector, _listener) = MemoryConnector::new();
        let client = client(connector, StaticToken::new("t"));

        assert!(!client.connect());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unauthenticated_connect_is_a_no_op() {
        let (connector, _listener) = MemoryConnector::new();
        let client = client(connector.clone(), StaticToken::anonymous());

        assert!(!client.connect());
        tokio::task::yield_now().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn send_while_disconnected_drops_quietly() {
        let (connector, _listener) = MemoryConnector::new();
        let client = client(connector, StaticToken::new("t"));

        assert!(!client.send(&ClientMessage::subscribe_task("abc")).unwrap());
    }

    #[tokio::test]
    async fn listener_with_weak_handle_does_not_pin_the_client() {
        let (connector, mut listener) = MemoryConnector::new();
        let client = client(connector, StaticToken::new("t"));
        let weak = client.downgrade();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        {
            let weak = weak.clone();
            client.subscribe(Topic::All, move |_| {
                if let Some(client) = weak.upgrade() {
                    let _ = seen_tx.send(client.connection_state());
                }
            });
        }

        assert!(client.connect());
        let mut peer = listener.accept().await.unwrap();
        client
            .state_changes()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        peer.send_event("system_notification", serde_json::json!({"message": "hi"}));
        assert_eq!(seen_rx.recv().await, Some(ConnectionState::Connected));

        drop(client);
        assert!(weak.upgrade().is_none());
        assert_eq!(peer.recv().await, Some(TransportFrame::Close));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_last_handle_ends_the_session() {
        let (connector, mut listener) = MemoryConnector::new();
        let client = client(connector, StaticToken::new("t"));
        let mut states = client.state_changes();

        assert!(client.connect());
        let mut peer = listener.accept().await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        drop(client);
        assert_eq!(peer.recv().await, Some(TransportFrame::Close));
        assert_eq!(peer.recv().await, None);
    }
}
