//! Checked-out connection handle

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use super::keyed::{LifecycleListener, SubPool};
use crate::cluster::NodeAddress;
use crate::lb::NodeGauge;

/// Accounting for one checked-out connection
///
/// Dropping the slot frees the node's borrow permit and its active count and
/// tells the listener the checkout ended. Unless the connection went back to
/// the idle set, it also gives up the connection's share of the pool-wide total.
pub(crate) struct ActiveSlot<C> {
    address: NodeAddress,
    pub(crate) sub_pool: Arc<SubPool<C>>,
    permit: Option<OwnedSemaphorePermit>,
    total: Arc<AtomicUsize>,
    holds_total: bool,
    listener: Arc<dyn LifecycleListener>,
}

impl<C> ActiveSlot<C> {
    pub(crate) fn new(
        address: &str,
        sub_pool: Arc<SubPool<C>>,
        permit: Option<OwnedSemaphorePermit>,
        total: Arc<AtomicUsize>,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        sub_pool.gauge.increment_active();
        listener.connection_checked_out(address, &sub_pool.gauge);
        Self {
            address: address.to_string(),
            sub_pool,
            permit,
            total,
            holds_total: false,
            listener,
        }
    }

    /// The slot now owns one unit of the pool-wide total
    pub(crate) fn hold_total(&mut self) {
        self.holds_total = true;
    }

    /// The connection was parked as idle and keeps its share of the total
    pub(crate) fn release_to_idle(mut self) {
        self.holds_total = false;
    }
}

impl<C> Drop for ActiveSlot<C> {
    fn drop(&mut self) {
        self.sub_pool.gauge.decrement_active();
        self.listener.connection_checked_in(&self.address, &self.sub_pool.gauge);
        if self.holds_total {
            self.total.fetch_sub(1, Ordering::Relaxed);
        }
        // Permit goes last so a waiter sees the idle connection first
        self.permit.take();
    }
}

/// A connection borrowed from the pool
///
/// Hand it back with `ClusterPool::release`. Call
/// [`PooledConnection::mark_corrupted`] after a failed protocol exchange so the
/// pool destroys it instead of recycling it.
pub struct PooledConnection<C> {
    pub(crate) address: NodeAddress,
    pub(crate) connection: C,
    pub(crate) corrupted: bool,
    pub(crate) created_at: Instant,
    pub(crate) slot: ActiveSlot<C>,
}

impl<C> PooledConnection<C> {
    /// Address of the node this connection is bound to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Flag the connection as unusable; it is destroyed on release
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Gauge of the sub-pool this connection was borrowed from
    pub(crate) fn gauge(&self) -> &NodeGauge {
        &self.slot.sub_pool.gauge
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address)
            .field("corrupted", &self.corrupted)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}
