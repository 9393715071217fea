//! Relay counters and the periodic snapshot handed to a metrics sink.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Monotonic counters shared across the router and connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    total_messages: AtomicU64,
    total_errors: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub room_count: usize,
    pub total_messages: u64,
    pub total_errors: u64,
    pub timestamp: DateTime<Utc>,
}

/// Sink for periodic snapshots. The storefront's analytics pipeline supplies
/// its own implementation; the default just logs.
pub trait MetricsSink: Send + Sync {
    fn record(&self, snapshot: &StatsSnapshot);
}

pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, snapshot: &StatsSnapshot) {
        info!(
            active_connections = snapshot.active_connections,
            room_count = snapshot.room_count,
            total_messages = snapshot.total_messages,
            total_errors = snapshot.total_errors,
            "relay stats snapshot"
        );
    }
}
