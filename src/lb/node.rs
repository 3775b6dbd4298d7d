use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::suspension::SuspensionState;
use crate::cluster::NodeAddress;

/// Live active/idle counts of one node's sub-pool
///
/// Owned by the backing pool, which is the only writer. A [`PooledNode`] holds
/// a handle to read its derived metrics without locking the pool.
#[derive(Debug, Default)]
pub struct NodeGauge {
    active: AtomicUsize,
    idle: AtomicUsize,
}

impl NodeGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently checked out
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Connections currently idle in the sub-pool
    pub fn idle(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement_active(&self) {
        // Never wrap below zero if a clear races a return
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn set_idle(&self, idle: usize) {
        self.idle.store(idle, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_active(&self, active: usize) {
        self.active.store(active, Ordering::Relaxed);
    }
}

/// Health record for one tracked node
///
/// Counters only move through the `report_*` callbacks invoked by the pool.
/// The suspension slot is written only by the suspension strategy.
pub struct PooledNode {
    /// Address of the node
    address: NodeAddress,

    /// Active/idle counts read from the backing pool
    gauge: Arc<NodeGauge>,

    /// Opaque state owned by the suspension strategy
    suspension_state: RwLock<Option<Box<dyn SuspensionState>>>,

    /// Number of times the node transitioned into suspension
    suspensions: AtomicU32,

    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    connections_corrupted: AtomicU64,
    connections_borrowed_total: AtomicU64,
    connections_released_total: AtomicU64,
}

impl PooledNode {
    /// Create a record reading its active/idle counts from `gauge`
    pub fn new(address: impl Into<NodeAddress>, gauge: Arc<NodeGauge>) -> Self {
        Self {
            address: address.into(),
            gauge,
            suspension_state: RwLock::new(None),
            suspensions: AtomicU32::new(0),
            connections_created: AtomicU64::new(0),
            connections_destroyed: AtomicU64::new(0),
            connections_corrupted: AtomicU64::new(0),
            connections_borrowed_total: AtomicU64::new(0),
            connections_released_total: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether this record reads from `gauge`
    ///
    /// A re-added address gets a fresh record and a fresh gauge, so a
    /// connection borrowed before the removal no longer matches.
    pub(crate) fn is_backed_by(&self, gauge: &NodeGauge) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.gauge), gauge)
    }

    /// Connections to this node currently checked out
    pub fn num_active(&self) -> usize {
        self.gauge.active()
    }

    /// Connections to this node currently idle
    pub fn num_idle(&self) -> usize {
        self.gauge.idle()
    }

    /// Whether the suspension strategy currently excludes this node
    ///
    /// A node that was never evaluated has no state and is not suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspension_state
            .read()
            .as_ref()
            .map(|state| state.is_suspended())
            .unwrap_or(false)
    }

    /// Read the strategy-owned suspension state
    pub fn with_suspension_state<R>(&self, f: impl FnOnce(Option<&dyn SuspensionState>) -> R) -> R {
        let guard = self.suspension_state.read();
        f(guard.as_deref())
    }

    /// Replace the strategy-owned suspension state
    pub fn set_suspension_state(&self, state: Option<Box<dyn SuspensionState>>) {
        *self.suspension_state.write() = state;
    }

    pub fn suspensions(&self) -> u32 {
        self.suspensions.load(Ordering::Relaxed)
    }

    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::Relaxed)
    }

    pub fn connections_destroyed(&self) -> u64 {
        self.connections_destroyed.load(Ordering::Relaxed)
    }

    pub fn connections_corrupted(&self) -> u64 {
        self.connections_corrupted.load(Ordering::Relaxed)
    }

    pub fn connections_borrowed_total(&self) -> u64 {
        self.connections_borrowed_total.load(Ordering::Relaxed)
    }

    pub fn connections_released_total(&self) -> u64 {
        self.connections_released_total.load(Ordering::Relaxed)
    }

    pub(crate) fn report_suspension(&self) {
        self.suspensions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_connection_corrupted(&self) {
        self.connections_corrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_connection_borrowed(&self) {
        self.connections_borrowed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report_connection_released(&self) {
        self.connections_released_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of the record
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            address: self.address.clone(),
            suspended: self.is_suspended(),
            suspensions: self.suspensions(),
            active: self.num_active(),
            idle: self.num_idle(),
            connections_created: self.connections_created(),
            connections_destroyed: self.connections_destroyed(),
            connections_corrupted: self.connections_corrupted(),
            connections_borrowed_total: self.connections_borrowed_total(),
            connections_released_total: self.connections_released_total(),
        }
    }
}

impl fmt::Debug for PooledNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledNode")
            .field("address", &self.address)
            .field("suspended", &self.is_suspended())
            .field("active", &self.num_active())
            .field("idle", &self.num_idle())
            .finish()
    }
}

/// Serializable copy of a [`PooledNode`]'s metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub address: NodeAddress,
    pub suspended: bool,
    pub suspensions: u32,
    pub active: usize,
    pub idle: usize,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub connections_corrupted: u64,
    pub connections_borrowed_total: u64,
    pub connections_released_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::suspension::FixedSuspension;
    use std::thread;

    #[test]
    fn test_node_creation() {
        let node = PooledNode::new("node1", Arc::new(NodeGauge::new()));
        assert_eq!(node.address(), "node1");
        assert_eq!(node.num_active(), 0);
        assert_eq!(node.num_idle(), 0);
        assert_eq!(node.suspensions(), 0);
        assert!(!node.is_suspended());
    }

    #[test]
    fn test_report_callbacks() {
        let node = PooledNode::new("node1", Arc::new(NodeGauge::new()));

        node.report_connection_created();
        node.report_connection_created();
        node.report_connection_borrowed();
        node.report_connection_released();
        node.report_connection_corrupted();
        node.report_connection_destroyed();

        assert_eq!(node.connections_created(), 2);
        assert_eq!(node.connections_borrowed_total(), 1);
        assert_eq!(node.connections_released_total(), 1);
        assert_eq!(node.connections_corrupted(), 1);
        assert_eq!(node.connections_destroyed(), 1);
    }

    #[test]
    fn test_gauge_is_read_through() {
        let gauge = Arc::new(NodeGauge::new());
        let node = PooledNode::new("node1", Arc::clone(&gauge));

        gauge.increment_active();
        gauge.set_idle(4);
        assert_eq!(node.num_active(), 1);
        assert_eq!(node.num_idle(), 4);

        gauge.decrement_active();
        gauge.decrement_active();
        assert_eq!(node.num_active(), 0);
    }

    #[test]
    fn test_suspension_state_slot() {
        let node = PooledNode::new("node1", Arc::new(NodeGauge::new()));

        node.set_suspension_state(Some(Box::new(FixedSuspension(true))));
        assert!(node.is_suspended());
        assert!(node.with_suspension_state(|s| s.is_some()));

        node.set_suspension_state(Some(Box::new(FixedSuspension(false))));
        assert!(!node.is_suspended());

        node.set_suspension_state(None);
        assert!(!node.is_suspended());
    }

    #[test]
    fn test_concurrent_reports() {
        let node = Arc::new(PooledNode::new("node1", Arc::new(NodeGauge::new())));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let node = Arc::clone(&node);
                thread::spawn(move || {
                    for _ in 0..250 {
                        node.report_connection_borrowed();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(node.connections_borrowed_total(), 1000);
    }

    #[test]
    fn test_snapshot() {
        let gauge = Arc::new(NodeGauge::new());
        let node = PooledNode::new("node1", Arc::clone(&gauge));
        gauge.set_idle(2);
        node.report_suspension();

        let snapshot = node.snapshot();
        assert_eq!(snapshot.address, "node1");
        assert_eq!(snapshot.idle, 2);
        assert_eq!(snapshot.suspensions, 1);
        assert!(!snapshot.suspended);
    }
}
