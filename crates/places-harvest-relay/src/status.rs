//! Live status text and delivery counters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Delivery counters. Updated monotonically, never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sent: u64,
    pub errors: u64,
    pub pending: u64,
}

/// Final counters returned when the delivery queue shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    #[serde(flatten)]
    pub stats: Stats,
    /// Records still queued when draining stopped. They are dropped.
    pub undelivered: usize,
}

impl ShutdownReport {
    /// Every enqueued record reached the collector.
    pub fn is_complete(&self) -> bool {
        self.undelivered == 0
    }
}

/// Coarse relay state shown next to the status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Connecting,
    Connected,
    Sending,
    Error,
}

/// Point-in-time view of the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: RelayStatus,
    pub message: String,
    #[serde(flatten)]
    pub stats: Stats,
    /// Records waiting in the queue (not yet in flight).
    pub queued: usize,
    /// Result of the last health probe, if one has run.
    pub reachable: Option<bool>,
    /// When the collector last acknowledged a batch.
    pub last_delivery: Option<DateTime<Utc>>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: RelayStatus::Connecting,
            message: "Connecting...".to_string(),
            stats: Stats::default(),
            queued: 0,
            reachable: None,
            last_delivery: None,
        }
    }
}

/// Shared, cloneable status surface backed by a watch channel.
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the status and message.
    pub fn set(&self, status: RelayStatus, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|snap| {
            snap.status = status;
            snap.message = message;
        });
    }

    /// Publish the latest counters and queue depth.
    pub fn record_queue(&self, stats: Stats, queued: usize) {
        self.tx.send_modify(|snap| {
            snap.stats = stats;
            snap.queued = queued;
        });
    }

    pub fn record_delivery(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|snap| snap.last_delivery = Some(at));
    }

    /// Publish a health probe result.
    pub fn set_reachable(&self, reachable: bool) {
        self.tx.send_modify(|snap| {
            snap.reachable = Some(reachable);
            if reachable {
                snap.status = RelayStatus::Connected;
                snap.message = "Server ready".to_string();
            } else {
                snap.status = RelayStatus::Error;
                snap.message = "Server offline".to_string();
            }
        });
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn stats(&self) -> Stats {
        self.tx.borrow().stats
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
