use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::websocket::protocol::PresenceStatus;

/// Per remote user presence record. No TTL is enforced: a stale entry
/// persists until an explicit offline update arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub metadata: Value,
    pub last_seen: i64,
}

/// Remote-user presence, mutated only by inbound `presence_update` events.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, user_id: &str, status: PresenceStatus, metadata: Value, last_seen: i64) {
        self.entries.insert(
            user_id.to_string(),
            PresenceEntry {
                status,
                metadata,
                last_seen,
            },
        );
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    pub fn all(&self) -> &HashMap<String, PresenceEntry> {
        &self.entries
    }
}
