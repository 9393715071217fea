use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::registry::{ConnectionRegistry, RoomRegistry};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::websocket::protocol::{event_frame, now_millis, ClientFrame, ServerFrame};

/// Flat per-frame dispatch over the connection and room registries.
///
/// Each inbound frame is handled independently; there is no negotiation
/// state. Malformed frames and unknown types get an `error` reply and the
/// connection stays open. Storefront code calls the fan-out methods
/// (`broadcast`, `send_to_user`, `broadcast_to_room`) directly; delivery is
/// always best-effort with no ack or retry.
pub struct MessageRouter {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
    stats: Arc<ServerStats>,
    verifier: Arc<dyn TokenVerifier>,
}

impl MessageRouter {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            connections: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(RoomRegistry::new()),
            stats: Arc::new(ServerStats::new()),
            verifier,
        }
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        self.connections.clone()
    }

    pub fn rooms(&self) -> Arc<RoomRegistry> {
        self.rooms.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Handles one inbound text frame from `conn`. Soft-fail policy: every
    /// failure is answered on the same connection, never by closing it.
    pub async fn handle_text(&self, conn: Uuid, text: &str) {
        self.stats.record_message();

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Malformed frame from {}: {}", conn, e);
                self.reply_error(conn, &format!("Invalid message format: {}", e))
                    .await;
                return;
            }
        };

        let frame: ClientFrame = match serde_json::from_value(value.clone()) {
            Ok(frame) => frame,
            Err(_) => {
                let kind = value["type"].as_str().unwrap_or("<missing>").to_string();
                debug!("Unrecognized frame type '{}' from {}", kind, conn);
                self.reply_error(conn, &format!("Unknown message type: {}", kind))
                    .await;
                return;
            }
        };

        match frame {
            ClientFrame::Authenticate { user_id, token } => {
                self.handle_authenticate(conn, user_id, &token).await;
            }
            ClientFrame::JoinRoom { room_id } => {
                self.rooms.join(conn, &room_id).await;
                self.reply(
                    conn,
                    ServerFrame::RoomJoined {
                        room_id,
                        timestamp: now_millis(),
                    },
                )
                .await;
            }
            ClientFrame::LeaveRoom { room_id } => {
                self.rooms.leave(conn, &room_id).await;
                self.reply(
                    conn,
                    ServerFrame::RoomLeft {
                        room_id,
                        timestamp: now_millis(),
                    },
                )
                .await;
            }
            ClientFrame::Subscribe { events } => {
                self.connections.add_subscriptions(conn, &events).await;
                self.reply(
                    conn,
                    ServerFrame::Subscribed {
                        events,
                        timestamp: now_millis(),
                    },
                )
                .await;
            }
            ClientFrame::Unsubscribe { events } => {
                self.connections.remove_subscriptions(conn, &events).await;
                self.reply(
                    conn,
                    ServerFrame::Unsubscribed {
                        events,
                        timestamp: now_millis(),
                    },
                )
                .await;
            }
            ClientFrame::Ping { timestamp } => {
                self.reply(conn, ServerFrame::Pong { timestamp }).await;
            }
            ClientFrame::PresenceUpdate { status, metadata } => {
                self.handle_presence(conn, status, metadata).await;
            }
        }
    }

    /// Binds only the identity the verifier vouches for; the client-asserted
    /// user id is never trusted.
    async fn handle_authenticate(&self, conn: Uuid, asserted: Option<String>, token: &str) {
        match self.verifier.verify(token).await {
            Ok(user_id) => {
                if let Some(asserted) = asserted {
                    if asserted != user_id {
                        warn!(
                            "Connection {} asserted user {} but token belongs to {}",
                            conn, asserted, user_id
                        );
                    }
                }
                self.connections.bind_user(conn, &user_id).await;
                info!("User {} authenticated on connection {}", user_id, conn);
                self.reply(
                    conn,
                    ServerFrame::Authenticated {
                        user_id,
                        timestamp: now_millis(),
                    },
                )
                .await;
            }
            Err(e) => {
                warn!("Authentication failed for connection {}: {}", conn, e);
                self.reply_error(conn, &format!("Authentication failed: {}", e))
                    .await;
            }
        }
    }

    /// Relays a presence change to every interested connection. The relay
    /// keeps no presence state itself; clients maintain their own entries
    /// from these events.
    async fn handle_presence(
        &self,
        conn: Uuid,
        status: crate::websocket::protocol::PresenceStatus,
        metadata: Value,
    ) {
        let user_id = match self.connections.user_of(conn).await {
            Some(user_id) => user_id,
            None => {
                self.reply_error(conn, "Not authenticated").await;
                return;
            }
        };

        self.broadcast(
            "presence_update",
            json!({
                "userId": user_id,
                "status": status,
                "metadata": metadata,
                "lastSeen": now_millis(),
            }),
        )
        .await;
    }

    /// Fan-out to every connection whose subscription filter accepts `event`.
    pub async fn broadcast(&self, event: &str, payload: Value) -> usize {
        let text = event_frame(event, payload);
        let delivered = self.connections.broadcast(event, &text).await;
        debug!("Broadcast '{}' delivered to {} connections", event, delivered);
        delivered
    }

    /// No-op when `user_id` is unknown or its transport is gone.
    pub async fn send_to_user(&self, user_id: &str, event: &str, payload: Value) -> bool {
        let text = event_frame(event, payload);
        self.connections.send_to_user(user_id, &text).await
    }

    /// No-op when the room has no members.
    pub async fn broadcast_to_room(&self, room_id: &str, event: &str, payload: Value) -> usize {
        let members = self.rooms.members(room_id).await;
        if members.is_empty() {
            return 0;
        }
        let text = event_frame(event, payload);
        self.connections.send_to_many(&members, &text).await
    }

    /// Unconditional close cleanup: connection, user binding and room
    /// membership all go, whatever the close cause was.
    pub async fn disconnect(&self, conn: Uuid) {
        self.rooms.remove_connection(conn).await;
        self.connections.unregister(conn).await;
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.connections.connection_count().await,
            room_count: self.rooms.room_count().await,
            total_messages: self.stats.total_messages(),
            total_errors: self.stats.total_errors(),
            timestamp: Utc::now(),
        }
    }

    async fn reply(&self, conn: Uuid, frame: ServerFrame) {
        self.connections.send_to(conn, &frame.to_text()).await;
    }

    async fn reply_error(&self, conn: Uuid, message: &str) {
        self.stats.record_error();
        self.reply(
            conn,
            ServerFrame::Error {
                message: message.to_string(),
            },
        )
        .await;
    }
}
