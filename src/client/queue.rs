use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Application message as queued and sent by the client:
/// `{type, data, channel?, timestamp, clientId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub timestamp: i64,
    pub client_id: Uuid,
}

/// FIFO of serialized frames awaiting an open transport. Flushed strictly in
/// order on reconnect; a mid-flush write failure puts the failed frame back
/// at the front and stops the flush, so order is never shuffled.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, frame: String) {
        self.items.push_back(frame);
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn requeue_front(&mut self, frame: String) {
        self.items.push_front(frame);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
