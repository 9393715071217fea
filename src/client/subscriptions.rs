use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub type ChannelCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Local fan-out of incoming events to per-channel callbacks.
///
/// Removal is purely local: an in-flight message already dispatched is not
/// drained or recalled. The caller is told when a channel gains its first or
/// loses its last callback so it can emit the matching subscribe/unsubscribe
/// protocol frames.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, HashMap<u64, ChannelCallback>>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the callback id and whether this was the channel's first
    /// callback.
    pub fn add(&mut self, channel: &str, callback: ChannelCallback) -> (u64, bool) {
        let id = self.next_id;
        self.next_id += 1;
        let entry = self.channels.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(id, callback);
        (id, first)
    }

    /// Returns true when the channel's callback set became empty and was
    /// removed.
    pub fn remove(&mut self, channel: &str, id: u64) -> bool {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.remove(&id);
            if entry.is_empty() {
                self.channels.remove(channel);
                return true;
            }
        }
        false
    }

    pub fn dispatch(&self, channel: &str, data: &Value) -> usize {
        match self.channels.get(channel) {
            Some(callbacks) => {
                for callback in callbacks.values() {
                    callback(data);
                }
                callbacks.len()
            }
            None => 0,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
