use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Process-wide pool counters
///
/// Every counter is independently atomic. A snapshot taken while a maintenance
/// tick is running may mix values from before and after the tick.
#[derive(Debug, Default)]
pub struct RunningStatistics {
    nodes_active: AtomicUsize,
    nodes_suspended: AtomicUsize,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    connections_corrupted: AtomicU64,
    connections_active: AtomicUsize,
    connections_borrowed_total: AtomicU64,
    connections_released_total: AtomicU64,
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_node_counts(&self, active: usize, suspended: usize) {
        self.nodes_active.store(active, Ordering::Relaxed);
        self.nodes_suspended.store(suspended, Ordering::Relaxed);
    }

    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_corrupted(&self) {
        self.connections_corrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_borrowed(&self) {
        self.connections_borrowed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_released(&self) {
        self.connections_released_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_checked_out(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Also called for handles dropped without a release
    pub(crate) fn connection_checked_in(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            taken_at: Utc::now(),
            nodes_active: self.nodes_active.load(Ordering::Relaxed),
            nodes_suspended: self.nodes_suspended.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            connections_corrupted: self.connections_corrupted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_borrowed_total: self.connections_borrowed_total.load(Ordering::Relaxed),
            connections_released_total: self.connections_released_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunningStatistics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub taken_at: DateTime<Utc>,

    /// Tracked nodes that are not suspended
    pub nodes_active: usize,

    /// Tracked nodes currently suspended
    pub nodes_suspended: usize,

    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub connections_corrupted: u64,

    /// Connections currently handed out to callers
    pub connections_active: usize,

    pub connections_borrowed_total: u64,
    pub connections_released_total: u64,
}
