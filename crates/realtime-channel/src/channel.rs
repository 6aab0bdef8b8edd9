//! Realtime channel with subscription multiplexing and automatic reconnection.

use crate::channel_fsm::{ChannelMachine, ChannelMachineInput, ConnectionState};
use crate::messages::{topic_of, ControlMessage};
use crate::subscriptions::{SubscriberId, SubscriptionSet};
use crate::token::AccessTokenProvider;
use crate::transport::{ConnectRequest, Connection, Connector, Outbound, TransportEvent};
use crate::{ChannelError, ChannelResult};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use session_config_and_utils::Config;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Realtime channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Inbound field that names a message's topic.
    pub topic_key: String,
    /// Reconnect after an unexpected drop.
    pub auto_reconnect: bool,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Ping period while connected. Zero disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connected socket counts as dropped.
    pub idle_timeout_ms: u64,
    /// How long close() waits for the server before forcing the disconnect.
    pub close_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic_key: "recipeId".to_string(),
            auto_reconnect: true,
            reconnect_base_delay_ms: 2_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            idle_timeout_ms: 75_000,
            close_timeout_ms: 5_000,
        }
    }
}

impl ChannelConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic_key: config.topic_key.clone(),
            auto_reconnect: config.realtime.auto_reconnect,
            reconnect_base_delay_ms: config.realtime.reconnect_base_delay_ms,
            reconnect_max_delay_ms: config.realtime.reconnect_max_delay_ms,
            max_reconnect_attempts: config.realtime.max_reconnect_attempts,
            heartbeat_interval_ms: config.realtime.heartbeat_interval_ms,
            idle_timeout_ms: config.realtime.idle_timeout_ms,
            close_timeout_ms: config.realtime.close_timeout_ms,
        }
    }

    /// Backoff before reconnect attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let delay = self.reconnect_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.reconnect_max_delay_ms))
    }
}

/// Events emitted by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected(Option<String>),
}

/// Host lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foregrounded,
    Backgrounded,
    Exiting,
}

struct ChannelState {
    machine: ChannelMachine,
    url: Option<String>,
    /// Set by connect(), cleared by close() and shutdown().
    wanted: bool,
    shut_down: bool,
    /// Bumped per connection attempt; stale transport events are ignored.
    generation: u64,
    reconnect_attempts: u32,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    subscriptions: SubscriptionSet,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    /// Last frame of any kind from the server.
    last_inbound: Instant,
    follower: Option<JoinHandle<()>>,
}

impl ChannelState {
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.machine.state())
    }

    fn transition(&mut self, input: ChannelMachineInput) -> bool {
        let from = self.connection_state();
        match self.machine.consume(&input) {
            Ok(_) => {
                debug!(from = ?from, to = ?self.connection_state(), "Channel state transition");
                true
            }
            Err(_) => false,
        }
    }

    /// Forget the socket tasks of the current connection.
    fn stop_tasks(&mut self) {
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn send_control(&self, message: ControlMessage) {
        if self.connection_state() != ConnectionState::Connected {
            return;
        }
        let Some(outbound) = &self.outbound else {
            return;
        };
        match message.to_json() {
            Ok(json) => {
                if outbound.send(Outbound::Text(json)).is_err() {
                    debug!(topic = %message.recipe_id, "Control message dropped, socket gone");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode control message"),
        }
    }
}

struct ChannelInner {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn AccessTokenProvider>,
    state: Mutex<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    next_subscriber: AtomicU64,
}

/// One shared realtime connection for the whole session.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                connector,
                tokens,
                state: Mutex::new(ChannelState {
                    machine: ChannelMachine::new(),
                    url: None,
                    wanted: false,
                    shut_down: false,
                    generation: 0,
                    reconnect_attempts: 0,
                    outbound: None,
                    subscriptions: SubscriptionSet::default(),
                    reader: None,
                    heartbeat: None,
                    last_inbound: Instant::now(),
                    follower: None,
                }),
                events,
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Connect to `url`. A no-op while connecting or connected.
    pub async fn connect(&self, url: &str) -> ChannelResult<()> {
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChannelError::Connection(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(ChannelError::ShutDown);
            }
            match state.connection_state() {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!("Realtime channel already connecting or connected");
                    return Ok(());
                }
                ConnectionState::Closing => {
                    return Err(ChannelError::Connection("channel is closing".to_string()));
                }
                ConnectionState::Disconnected => {}
            }
            state.url = Some(url.to_string());
            state.wanted = true;
            state.reconnect_attempts = 0;
        }

        Arc::clone(&self.inner).open().await
    }

    /// Subscribe to a topic. Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.state.lock();
        if state.shut_down {
            // Closed queue: the subscriber sees end-of-stream right away.
            drop(tx);
        } else if state.subscriptions.add(&topic, id, tx) {
            debug!(topic = %topic, "First subscriber for topic");
            state.send_control(ControlMessage::subscribe(&topic));
        }

        Subscription {
            id,
            topic,
            rx,
            channel: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Send a raw frame. Fails with `Unavailable` unless connected.
    pub fn send(&self, raw: impl Into<String>) -> ChannelResult<()> {
        let state = self.inner.state.lock();
        if state.connection_state() != ConnectionState::Connected {
            debug!("Dropping outbound message, channel not connected");
            return Err(ChannelError::Unavailable);
        }
        let outbound = state.outbound.as_ref().ok_or(ChannelError::Unavailable)?;
        outbound
            .send(Outbound::Text(raw.into()))
            .map_err(|_| ChannelError::Unavailable)
    }

    /// Close the connection and stop reconnecting. `connect` may reopen it.
    ///
    /// A server that never finishes the close handshake is abandoned after
    /// `close_timeout_ms` and the channel reports `Disconnected` anyway.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.wanted = false;
        match state.connection_state() {
            ConnectionState::Connected => {
                info!("Closing realtime channel");
                state.transition(ChannelMachineInput::CloseRequested);
                if let Some(heartbeat) = state.heartbeat.take() {
                    heartbeat.abort();
                }
                if let Some(outbound) = state.outbound.take() {
                    let _ = outbound.send(Outbound::Close);
                }
            }
            ConnectionState::Connecting => {
                info!("Closing realtime channel while connecting");
                state.transition(ChannelMachineInput::CloseRequested);
            }
            ConnectionState::Disconnected | ConnectionState::Closing => return,
        }
        self.inner.arm_close_timeout(state.generation);
    }

    /// Final teardown: closes the socket, ends every subscription stream and
    /// refuses further connects.
    pub fn shutdown(&self) {
        self.close();
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.subscriptions.clear();
        if let Some(follower) = state.follower.take() {
            follower.abort();
        }
        info!("Realtime channel shut down");
    }

    pub fn on_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Foregrounded | LifecycleEvent::Backgrounded => {
                debug!(event = ?event, "Lifecycle event, channel kept open");
            }
            LifecycleEvent::Exiting => self.shutdown(),
        }
    }

    /// Reconnect whenever `online` reports the network available again.
    pub fn reconnect_when_online<S>(&self, online: S)
    where
        S: Stream<Item = bool> + Send + Unpin + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut online = online;
            while let Some(available) = online.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !available {
                    debug!("Network unavailable");
                    continue;
                }
                let should_connect = {
                    let mut state = inner.state.lock();
                    let idle = state.connection_state() == ConnectionState::Disconnected;
                    if state.wanted && idle && !state.shut_down {
                        state.reconnect_attempts = 0;
                        true
                    } else {
                        false
                    }
                };
                if should_connect {
                    info!("Network available, reconnecting realtime channel");
                    if let Err(e) = inner.open().await {
                        debug!(error = %e, "Reconnect on network return failed");
                    }
                }
            }
        });

        let mut state = self.inner.state.lock();
        if state.shut_down {
            handle.abort();
            return;
        }
        if let Some(previous) = state.follower.replace(handle) {
            previous.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.state.lock().subscriptions.subscriber_count(topic)
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }
}

impl ChannelInner {
    fn open(self: Arc<Self>) -> BoxFuture<'static, ChannelResult<()>> {
        async move {
            let (url, generation) = {
                let mut state = self.state.lock();
                if state.shut_down {
                    return Err(ChannelError::ShutDown);
                }
                let Some(url) = state.url.clone() else {
                    return Err(ChannelError::Connection("no endpoint configured".to_string()));
                };
                if !state.transition(ChannelMachineInput::Connect) {
                    return Ok(());
                }
                state.generation += 1;
                (url, state.generation)
            };

            info!(url = %url, "Connecting to realtime server");

            let connection = match self.tokens.access_token().await {
                Ok(bearer) => self.connector.connect(ConnectRequest { url, bearer }).await,
                Err(e) => Err(e),
            };

            match connection {
                Ok(connection) => {
                    self.on_open(generation, connection);
                    Ok(())
                }
                Err(e) => {
                    self.on_failure(generation, &e);
                    Err(e)
                }
            }
        }
        .boxed()
    }

    fn on_open(self: &Arc<Self>, generation: u64, connection: Connection) {
        let Connection { outbound, inbound } = connection;
        let mut state = self.state.lock();

        if state.generation != generation || state.shut_down {
            let _ = outbound.send(Outbound::Close);
            return;
        }
        if state.connection_state() == ConnectionState::Closing {
            let _ = outbound.send(Outbound::Close);
            state.transition(ChannelMachineInput::Closed);
            drop(state);
            let _ = self.events.send(ChannelEvent::Disconnected(None));
            return;
        }

        state.transition(ChannelMachineInput::Opened);
        state.outbound = Some(outbound);
        state.reconnect_attempts = 0;
        state.last_inbound = Instant::now();

        let topics = state.subscriptions.topics();
        if !topics.is_empty() {
            info!(count = topics.len(), "Re-subscribing active topics");
        }
        for topic in &topics {
            state.send_control(ControlMessage::subscribe(topic));
        }

        let reader = tokio::spawn(Arc::clone(self).read_loop(generation, inbound));
        if let Some(previous) = state.reader.replace(reader) {
            previous.abort();
        }
        let heartbeat = self.spawn_heartbeat(generation);
        if let Some(previous) = std::mem::replace(&mut state.heartbeat, heartbeat) {
            previous.abort();
        }
        drop(state);

        info!("Connected to realtime server");
        let _ = self.events.send(ChannelEvent::Connected);
    }

    fn on_failure(self: &Arc<Self>, generation: u64, error: &ChannelError) {
        let reconnect = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            if state.connection_state() == ConnectionState::Closing {
                state.transition(ChannelMachineInput::Closed);
            } else {
                state.transition(ChannelMachineInput::Failed);
            }
            state.wanted && self.config.auto_reconnect && !state.shut_down
        };

        warn!(error = %error, "Realtime connect failed");
        let _ = self
            .events
            .send(ChannelEvent::Disconnected(Some(error.to_string())));

        if reconnect {
            self.schedule_reconnect();
        }
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut inbound: mpsc::Receiver<TransportEvent>) {
        let mut reason = None;
        while let Some(event) = inbound.recv().await {
            self.mark_alive(generation);
            match event {
                TransportEvent::Message(text) => self.dispatch(&text),
                TransportEvent::Heartbeat => {}
                TransportEvent::Closed(closed) => {
                    reason = closed;
                    break;
                }
                TransportEvent::Error(e) => {
                    warn!(error = %e, "Realtime transport error");
                    reason = Some(e);
                    break;
                }
            }
        }
        self.on_closed(generation, reason);
    }

    fn mark_alive(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.last_inbound = Instant::now();
        }
    }

    /// Ping the server every `heartbeat_interval_ms` and drop the connection
    /// once it has been silent for `idle_timeout_ms`.
    fn spawn_heartbeat(self: &Arc<Self>, generation: u64) -> Option<JoinHandle<()>> {
        if self.config.heartbeat_interval_ms == 0 {
            return None;
        }
        let period = Duration::from_millis(self.config.heartbeat_interval_ms);
        let idle_timeout = Duration::from_millis(
            self.config
                .idle_timeout_ms
                .max(self.config.heartbeat_interval_ms),
        );
        let weak = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let silent_for = {
                    let state = inner.state.lock();
                    if state.generation != generation
                        || state.connection_state() != ConnectionState::Connected
                    {
                        return;
                    }
                    let silent_for = state.last_inbound.elapsed();
                    if silent_for < idle_timeout {
                        if let Some(outbound) = &state.outbound {
                            let _ = outbound.send(Outbound::Ping);
                        }
                    }
                    silent_for
                };
                if silent_for >= idle_timeout {
                    warn!(
                        silent_ms = silent_for.as_millis() as u64,
                        "Realtime server stopped responding"
                    );
                    inner.on_liveness_lost(generation);
                    return;
                }
            }
        }))
    }

    fn on_liveness_lost(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            if let Some(outbound) = &state.outbound {
                let _ = outbound.send(Outbound::Close);
            }
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
        }
        self.on_closed(generation, Some("heartbeat timeout".to_string()));
    }

    fn arm_close_timeout(self: &Arc<Self>, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, close timeout not armed");
            return;
        };
        let timeout = Duration::from_millis(self.config.close_timeout_ms);
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.force_closed(generation);
            }
        });
    }

    /// Abandon a close the server never acknowledged.
    fn force_closed(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation
                || state.connection_state() != ConnectionState::Closing
            {
                return;
            }
            // Late events from the abandoned socket carry a stale generation.
            state.generation += 1;
            state.stop_tasks();
            state.transition(ChannelMachineInput::Closed);
        }
        warn!("Realtime server did not finish closing, disconnecting anyway");
        let _ = self
            .events
            .send(ChannelEvent::Disconnected(Some("close timed out".to_string())));
    }

    fn dispatch(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring non-JSON realtime message");
                return;
            }
        };
        let Some(topic) = topic_of(&message, &self.config.topic_key) else {
            debug!("Ignoring realtime message without topic");
            return;
        };

        let subscribers = self.state.lock().subscriptions.senders(&topic);
        if subscribers.is_empty() {
            debug!(topic = %topic, "Discarding message for topic with no subscribers");
            return;
        }
        for subscriber in subscribers {
            let _ = subscriber.send(message.clone());
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        let reconnect = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.stop_tasks();
            match state.connection_state() {
                ConnectionState::Closing => {
                    state.transition(ChannelMachineInput::Closed);
                    false
                }
                ConnectionState::Connected => {
                    state.transition(ChannelMachineInput::Dropped);
                    state.wanted && self.config.auto_reconnect && !state.shut_down
                }
                _ => return,
            }
        };

        info!(reason = ?reason, "Disconnected from realtime server");
        let _ = self.events.send(ChannelEvent::Disconnected(reason));

        if reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let (attempt, delay) = {
            let mut state = self.state.lock();
            if state.reconnect_attempts >= self.config.max_reconnect_attempts {
                warn!(
                    attempts = state.reconnect_attempts,
                    "Max reconnect attempts reached, giving up"
                );
                return;
            }
            state.reconnect_attempts += 1;
            let attempt = state.reconnect_attempts;
            (attempt, self.config.delay_for_attempt(attempt))
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let still_wanted = {
                let state = inner.state.lock();
                state.wanted
                    && !state.shut_down
                    && state.connection_state() == ConnectionState::Disconnected
            };
            if !still_wanted {
                return;
            }
            if let Err(e) = inner.open().await {
                debug!(attempt, error = %e, "Reconnect attempt failed");
            }
        });
    }

    fn release(&self, topic: &str, id: SubscriberId) {
        let mut state = self.state.lock();
        if state.subscriptions.remove(topic, id) {
            debug!(topic = %topic, "Last subscriber gone");
            state.send_control(ControlMessage::unsubscribe(topic));
        }
    }
}

/// A live topic subscription. Messages arrive in receive order.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    rx: mpsc::UnboundedReceiver<Value>,
    channel: Weak<ChannelInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message; `None` once the channel is shut down.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.release(&self.topic, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
