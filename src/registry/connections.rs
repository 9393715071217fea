use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct Inner {
    senders: HashMap<Uuid, mpsc::UnboundedSender<Message>>,
    // user id -> connection, last registration wins
    users: HashMap<String, Uuid>,
    user_of: HashMap<Uuid, String>,
    subscriptions: HashMap<Uuid, HashSet<String>>,
}

/// Live connections keyed by connection id, with their bound user identity
/// and channel subscription filter. All delivery is fire-and-forget: a failed
/// write is logged and dropped, never retried or queued.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid, sender: mpsc::UnboundedSender<Message>) {
        let mut inner = self.inner.write().await;
        inner.senders.insert(id, sender);
        inner.subscriptions.insert(id, HashSet::new());
        info!("Registered connection {}", id);
    }

    /// Binds a verified user identity to a connection. A user reconnecting
    /// from a new connection silently displaces the previous binding; there
    /// is no multi-device fan-out.
    pub async fn bind_user(&self, id: Uuid, user_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.users.insert(user_id.to_string(), id) {
            if previous != id {
                debug!("User {} rebound from connection {} to {}", user_id, previous, id);
                inner.user_of.remove(&previous);
            }
        }
        inner.user_of.insert(id, user_id.to_string());
    }

    pub async fn user_of(&self, id: Uuid) -> Option<String> {
        self.inner.read().await.user_of.get(&id).cloned()
    }

    /// Removes the connection from the sender map, the user map (if bound)
    /// and the subscription table. Idempotent: a second call is a no-op.
    pub async fn unregister(&self, id: Uuid) {
        let mut inner = self.inner.write().await;
        let removed = inner.senders.remove(&id).is_some();
        inner.subscriptions.remove(&id);
        if let Some(user_id) = inner.user_of.remove(&id) {
            // Only drop the user mapping if it still points at us; a newer
            // connection for the same user keeps its binding.
            if inner.users.get(&user_id) == Some(&id) {
                inner.users.remove(&user_id);
            }
        }
        if removed {
            info!("Unregistered connection {}", id);
        }
    }

    /// Replaces the connection's filter wholesale.
    pub async fn set_subscriptions(&self, id: Uuid, events: &[String]) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner.subscriptions.get_mut(&id) {
            *subs = events.iter().cloned().collect();
        }
    }

    /// Adds channels to the connection's filter. An empty filter means
    /// "receive everything"; the first subscription narrows delivery to the
    /// listed channels.
    pub async fn add_subscriptions(&self, id: Uuid, events: &[String]) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner.subscriptions.get_mut(&id) {
            subs.extend(events.iter().cloned());
        }
    }

    pub async fn remove_subscriptions(&self, id: Uuid, events: &[String]) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner.subscriptions.get_mut(&id) {
            for event in events {
                subs.remove(event);
            }
        }
    }

    pub async fn subscriptions(&self, id: Uuid) -> Option<HashSet<String>> {
        self.inner.read().await.subscriptions.get(&id).cloned()
    }

    pub async fn send_to(&self, id: Uuid, text: &str) -> bool {
        if let Some(sender) = self.inner.read().await.senders.get(&id) {
            if let Err(e) = sender.send(Message::Text(text.to_string())) {
                error!("Failed to send to connection {}: {}", id, e);
                return false;
            }
            true
        } else {
            false
        }
    }

    /// No-op when the user is unknown or its writer task is gone. The server
    /// never queues for offline users.
    pub async fn send_to_user(&self, user_id: &str, text: &str) -> bool {
        let inner = self.inner.read().await;
        match inner.users.get(user_id) {
            Some(id) => match inner.senders.get(id) {
                Some(sender) => sender.send(Message::Text(text.to_string())).is_ok(),
                None => false,
            },
            None => false,
        }
    }

    /// Delivers to every connection whose filter is empty or contains
    /// `event`, and to none outside that set.
    pub async fn broadcast(&self, event: &str, text: &str) -> usize {
        let inner = self.inner.read().await;
        let message = Message::Text(text.to_string());
        let mut delivered = 0;

        for (id, sender) in inner.senders.iter() {
            let wants = inner
                .subscriptions
                .get(id)
                .map(|subs| subs.is_empty() || subs.contains(event))
                .unwrap_or(true);
            if !wants {
                continue;
            }
            if let Err(e) = sender.send(message.clone()) {
                error!("Failed to broadcast to connection {}: {}", id, e);
            } else {
                delivered += 1;
            }
        }

        delivered
    }

    /// Delivers to a fixed member list, used for room fan-out.
    pub async fn send_to_many(&self, ids: &[Uuid], text: &str) -> usize {
        let inner = self.inner.read().await;
        let message = Message::Text(text.to_string());
        let mut delivered = 0;

        for id in ids {
            if let Some(sender) = inner.senders.get(id) {
                if let Err(e) = sender.send(message.clone()) {
                    error!("Failed to send to connection {}: {}", id, e);
                } else {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.senders.len()
    }
}
