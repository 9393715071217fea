//! JSON wire frames for the relay protocol.
//!
//! Inbound frames are `{type, payload}`; outbound protocol frames carry
//! their fields next to the tag. Application broadcasts are built as
//! `{type: <event>, data, timestamp}` envelopes since their tag is the
//! event name chosen by the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Frames a client may send. Anything else gets an `error` reply and the
/// connection stays open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        #[serde(default)]
        user_id: Option<String>,
        token: String,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    Subscribe {
        events: Vec<String>,
    },
    Unsubscribe {
        events: Vec<String>,
    },
    Ping {
        timestamp: i64,
    },
    PresenceUpdate {
        status: PresenceStatus,
        #[serde(default)]
        metadata: Value,
    },
}

/// Fixed-shape server replies. `Pong` echoes the client's ping timestamp so
/// the client can compute round-trip latency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connected { connection_id: Uuid, timestamp: i64 },
    Authenticated { user_id: String, timestamp: i64 },
    RoomJoined { room_id: String, timestamp: i64 },
    RoomLeft { room_id: String, timestamp: i64 },
    Subscribed { events: Vec<String>, timestamp: i64 },
    Unsubscribed { events: Vec<String>, timestamp: i64 },
    Pong { timestamp: i64 },
    Error { message: String },
}

impl ServerFrame {
    pub fn to_text(&self) -> String {
        // The frame shapes above always serialize
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// Application broadcast envelope: `{type: <event>, data, timestamp}`.
pub fn event_frame(event: &str, data: Value) -> String {
    json!({
        "type": event,
        "data": data,
        "timestamp": now_millis(),
    })
    .to_string()
}
