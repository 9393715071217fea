//! Rust counterpart of the storefront's browser realtime client.
//!
//! [`RealtimeClient`] is a thin handle over shared state driven by
//! background tasks: a writer task feeding the websocket sink, a read loop,
//! and a heartbeat timer. Reconnection uses the same connect routine as the
//! initial connection, scheduled through an exponential-backoff timer.
//! Events are emitted on a broadcast channel; per-channel callbacks receive
//! application messages.

mod backoff;
mod latency;
mod presence;
mod queue;
mod subscriptions;

pub use backoff::ReconnectPolicy;
pub use latency::LatencyTracker;
pub use presence::{PresenceEntry, PresenceTracker};
pub use queue::{OutboundMessage, OutboundQueue};
pub use subscriptions::{ChannelCallback, SubscriptionRegistry};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, TransportError};
use crate::websocket::protocol::{now_millis, PresenceStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub presence_enabled: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            presence_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events surfaced to listeners alongside the per-channel callbacks.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Transport or protocol error. Errors alone never trigger reconnection;
    /// only a non-clean close does.
    Error(String),
    /// Application message, also dispatched to channel callbacks.
    Message { channel: String, data: Value },
    Pong { latency_ms: i64 },
}

struct ClientShared {
    config: ClientConfig,
    client_id: Uuid,
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    queue: Mutex<OutboundQueue>,
    subscriptions: Mutex<SubscriptionRegistry>,
    presence: Mutex<PresenceTracker>,
    latency: Mutex<LatencyTracker>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    error_count: AtomicU64,
    user_closed: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

/// Handle to the realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<ClientShared>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        url::Url::parse(&config.url).map_err(|e| {
            AppError::TransportError(TransportError::ConnectFailed(format!(
                "invalid url '{}': {}",
                config.url, e
            )))
        })?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                client_id: Uuid::new_v4(),
                state: Mutex::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                queue: Mutex::new(OutboundQueue::new()),
                subscriptions: Mutex::new(SubscriptionRegistry::new()),
                presence: Mutex::new(PresenceTracker::new()),
                latency: Mutex::new(LatencyTracker::new()),
                heartbeat: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                error_count: AtomicU64::new(0),
                user_closed: AtomicBool::new(false),
                events,
            }),
        })
    }

    /// Subscribe to client events. Slow consumers may miss events; the
    /// channel is bounded.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn client_id(&self) -> Uuid {
        self.shared.client_id
    }

    /// Opens the connection. No-op when already connected or connecting, so
    /// concurrent calls never race a duplicate transport into existence.
    pub async fn connect(&self) {
        self.shared.clone().connect().await;
    }

    /// Graceful shutdown: sends `offline` presence while the transport is
    /// still up, then closes without triggering reconnection.
    pub async fn disconnect(&self) {
        self.shared.user_closed.store(true, Ordering::SeqCst);

        if self.shared.config.presence_enabled
            && *self.shared.state.lock().await == ConnectionState::Connected
        {
            self.shared.send_presence(PresenceStatus::Offline).await;
        }

        self.shared.stop_heartbeat().await;
        // Dropping the writer ends the writer task, which closes the sink
        self.shared.writer.lock().await.take();
        self.shared
            .transition(ConnectionState::Disconnected)
            .await;
        info!("Client {} disconnected", self.shared.client_id);
    }

    pub async fn authenticate(&self, user_id: &str, token: &str) {
        self.shared
            .send_frame(
                json!({
                    "type": "authenticate",
                    "payload": {"userId": user_id, "token": token},
                })
                .to_string(),
            )
            .await;
    }

    pub async fn join_room(&self, room_id: &str) {
        self.shared
            .send_frame(
                json!({"type": "join_room", "payload": {"roomId": room_id}}).to_string(),
            )
            .await;
    }

    pub async fn leave_room(&self, room_id: &str) {
        self.shared
            .send_frame(
                json!({"type": "leave_room", "payload": {"roomId": room_id}}).to_string(),
            )
            .await;
    }

    /// Sends an application message, queueing it when the transport is not
    /// open (or the write fails). Queued messages flush FIFO on reconnect.
    pub async fn send(&self, event_type: &str, data: Value, channel: Option<&str>) {
        let message = OutboundMessage {
            message_type: event_type.to_string(),
            data,
            channel: channel.map(str::to_string),
            timestamp: now_millis(),
            client_id: self.shared.client_id,
        };
        // OutboundMessage serialization cannot fail
        let text = serde_json::to_string(&message).unwrap_or_default();
        self.shared.send_frame(text).await;
    }

    /// Registers a callback for `channel` and, for the channel's first
    /// callback, emits a `subscribe` protocol frame. The returned handle
    /// removes the callback; the last removal emits `unsubscribe`.
    pub async fn subscribe(
        &self,
        channel: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let (id, first) = self
            .shared
            .subscriptions
            .lock()
            .await
            .add(channel, Arc::new(callback));

        if first {
            self.shared
                .send_frame(
                    json!({"type": "subscribe", "payload": {"events": [channel]}}).to_string(),
                )
                .await;
        }

        Subscription {
            shared: self.shared.clone(),
            channel: channel.to_string(),
            id,
        }
    }

    /// Page-visibility hook, the native stand-in for the browser's
    /// `visibilitychange` listener. Hidden sends `away`; visible sends
    /// `online` and kicks off a reconnect when currently disconnected.
    pub async fn set_page_visible(&self, visible: bool) {
        if self.shared.config.presence_enabled {
            let status = if visible {
                PresenceStatus::Online
            } else {
                PresenceStatus::Away
            };
            self.shared.send_presence(status).await;
        }

        if visible && *self.shared.state.lock().await == ConnectionState::Disconnected {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                shared.connect().await;
            });
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.lock().await
    }

    pub async fn average_latency_ms(&self) -> f64 {
        self.shared.latency.lock().await.average_ms()
    }

    pub async fn queued_messages(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    pub fn error_count(&self) -> u64 {
        self.shared.error_count.load(Ordering::Relaxed)
    }

    pub async fn presence_of(&self, user_id: &str) -> Option<PresenceEntry> {
        self.shared.presence.lock().await.get(user_id).cloned()
    }
}

/// Callback registration handle returned by [`RealtimeClient::subscribe`].
pub struct Subscription {
    shared: Arc<ClientShared>,
    channel: String,
    id: u64,
}

impl Subscription {
    /// Removes the callback locally; when it was the channel's last one, an
    /// `unsubscribe` protocol frame is sent. No in-flight draining.
    pub async fn unsubscribe(self) {
        let emptied = self
            .shared
            .subscriptions
            .lock()
            .await
            .remove(&self.channel, self.id);

        if emptied {
            self.shared
                .send_frame(
                    json!({"type": "unsubscribe", "payload": {"events": [self.channel]}})
                        .to_string(),
                )
                .await;
        }
    }
}

impl ClientShared {
    fn connect(self: Arc<Self>) -> futures::future::BoxFuture<'static, ()> {
        Box::pin(self.connect_inner())
    }

    async fn connect_inner(self: Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnectionState::Connected | ConnectionState::Connecting => return,
                _ => *state = ConnectionState::Connecting,
            }
        }
        self.emit(ClientEvent::StateChanged(ConnectionState::Connecting));
        self.user_closed.store(false, Ordering::SeqCst);

        let ws_stream = match connect_async(self.config.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                self.record_error(format!("Connection failed: {}", e));
                self.schedule_reconnect().await;
                return;
            }
        };

        info!("Client {} connected to {}", self.client_id, self.config.url);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.writer.lock().await = Some(tx);

        tokio::spawn(async move {
            let mut ws_sink = ws_sink;
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    error!("Client write failed: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        self.transition(ConnectionState::Connected).await;
        self.clone().start_heartbeat().await;
        self.flush_queue().await;

        if self.config.presence_enabled {
            self.send_presence(PresenceStatus::Online).await;
        }

        let shared = self.clone();
        tokio::spawn(shared.read_loop(ws_stream));
    }

    async fn read_loop(self: Arc<Self>, mut stream: futures::stream::SplitStream<WsStream>) {
        let mut clean = false;
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_frame(&text).await,
                Ok(Message::Close(_)) => {
                    clean = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.record_error(format!("Transport error: {}", e));
                    break;
                }
            }
        }
        self.handle_close(clean).await;
    }

    /// Close handling mirrors the browser's `wasClean` policy: only a
    /// non-clean close triggers the backoff schedule.
    async fn handle_close(self: Arc<Self>, clean: bool) {
        self.stop_heartbeat().await;
        self.writer.lock().await.take();

        if self.user_closed.load(Ordering::SeqCst) || clean {
            self.transition(ConnectionState::Disconnected).await;
            return;
        }

        warn!("Client {} lost its connection", self.client_id);
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(self: Arc<Self>) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let policy = &self.config.reconnect;

        if policy.exhausted(attempt) {
            self.transition(ConnectionState::Disconnected).await;
            self.emit(ClientEvent::Error(format!(
                "Reconnect attempts exhausted after {}",
                policy.max_attempts
            )));
            error!(
                "Client {} giving up after {} reconnect attempts",
                self.client_id, policy.max_attempts
            );
            return;
        }

        let delay = policy.delay(attempt);
        self.transition(ConnectionState::Reconnecting).await;
        debug!(
            "Client {} reconnect attempt {} in {:?}",
            self.client_id, attempt, delay
        );

        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.connect().await;
        });
    }

    async fn start_heartbeat(self: Arc<Self>) {
        self.stop_heartbeat().await;
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let frame = json!({
                    "type": "ping",
                    "payload": {"timestamp": now_millis()},
                })
                .to_string();
                if !shared.try_write(frame).await {
                    break;
                }
            }
        });
        *self.heartbeat.lock().await = Some(handle);
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }

    async fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                self.record_error(format!("Malformed server frame: {}", e));
                return;
            }
        };

        let kind = value["type"].as_str().unwrap_or_default().to_string();
        match kind.as_str() {
            "pong" => {
                let sent = value["timestamp"].as_i64().unwrap_or_default();
                let latency_ms = now_millis() - sent;
                self.latency.lock().await.record(latency_ms as f64);
                self.emit(ClientEvent::Pong { latency_ms });
            }
            "connected" => {
                debug!("Client {} greeted: {}", self.client_id, text);
            }
            "error" => {
                let message = value["message"].as_str().unwrap_or("unknown").to_string();
                self.record_error(message);
            }
            "presence_update" => {
                let data = &value["data"];
                if let (Some(user_id), Ok(status)) = (
                    data["userId"].as_str(),
                    serde_json::from_value::<PresenceStatus>(data["status"].clone()),
                ) {
                    self.presence.lock().await.apply(
                        user_id,
                        status,
                        data["metadata"].clone(),
                        data["lastSeen"].as_i64().unwrap_or_default(),
                    );
                }
                self.dispatch_message(&kind, &value["data"]).await;
            }
            _ => {
                self.dispatch_message(&kind, &value["data"]).await;
            }
        }
    }

    async fn dispatch_message(&self, channel: &str, data: &Value) {
        self.subscriptions.lock().await.dispatch(channel, data);
        self.emit(ClientEvent::Message {
            channel: channel.to_string(),
            data: data.clone(),
        });
    }

    /// Immediate write when connected, FIFO queue otherwise.
    async fn send_frame(&self, text: String) {
        let connected = *self.state.lock().await == ConnectionState::Connected;
        if connected && self.try_write(text.clone()).await {
            return;
        }
        self.queue.lock().await.push_back(text);
    }

    /// Flushes the queue strictly in order; a failed write puts the frame
    /// back at the front and stops so nothing is reordered.
    async fn flush_queue(&self) {
        loop {
            let next = self.queue.lock().await.pop_front();
            let Some(text) = next else { break };
            if !self.try_write(text.clone()).await {
                self.queue.lock().await.requeue_front(text);
                break;
            }
        }
    }

    async fn try_write(&self, text: String) -> bool {
        match self.writer.lock().await.as_ref() {
            Some(sender) => sender.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    async fn send_presence(&self, status: PresenceStatus) {
        self.send_frame(
            json!({
                "type": "presence_update",
                "payload": {"status": status, "metadata": {}},
            })
            .to_string(),
        )
        .await;
    }

    async fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock().await;
        if *state != next {
            *state = next;
            drop(state);
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    fn record_error(&self, message: String) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.emit(ClientEvent::Error(message));
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}
