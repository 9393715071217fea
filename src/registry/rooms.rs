use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<String, HashSet<Uuid>>,
    // A connection is in at most one room at a time.
    room_of: HashMap<Uuid, String>,
}

/// Named broadcast scopes with dynamic membership. Rooms are created lazily
/// on first join and garbage-collected when their last member leaves.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: RwLock<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joining a new room first leaves the previous one, so membership and
    /// the current-room pointer never disagree.
    pub async fn join(&self, conn: Uuid, room_id: &str) {
        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.room_of.get(&conn).cloned() {
            if previous == room_id {
                return;
            }
            Self::remove_member(&mut inner, conn, &previous);
            debug!("Connection {} left room {} via join", conn, previous);
        }

        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn);
        inner.room_of.insert(conn, room_id.to_string());
        info!("Connection {} joined room {}", conn, room_id);
    }

    pub async fn leave(&self, conn: Uuid, room_id: &str) {
        let mut inner = self.inner.write().await;
        Self::remove_member(&mut inner, conn, room_id);
        if inner.room_of.get(&conn).map(String::as_str) == Some(room_id) {
            inner.room_of.remove(&conn);
        }
        info!("Connection {} left room {}", conn, room_id);
    }

    /// Strips the connection from whatever room it is in. Part of the
    /// unconditional close cleanup; idempotent.
    pub async fn remove_connection(&self, conn: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(room_id) = inner.room_of.remove(&conn) {
            Self::remove_member(&mut inner, conn, &room_id);
        }
    }

    pub async fn members(&self, room_id: &str) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn current_room(&self, conn: Uuid) -> Option<String> {
        self.inner.read().await.room_of.get(&conn).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    fn remove_member(inner: &mut Inner, conn: Uuid, room_id: &str) {
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(&conn);
            if members.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }
}
