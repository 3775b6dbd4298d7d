//! Per-node keyed object pool
//!
//! One sub-pool per node address, each with:
//! - A LIFO idle set (the most recently returned connection is reused first)
//! - An optional borrow semaphore bounding concurrent checkouts
//! - A [`NodeGauge`] publishing its active/idle counts
//!
//! Borrowing waits at most `borrow_wait` for a permit. The orchestrator turns
//! repeated short borrows into its own, longer deadline.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::clock::Clock;
use super::connection::{ActiveSlot, PooledConnection};
use crate::cluster::NodeAddress;
use crate::factory::ConnectionFactory;
use crate::lb::NodeGauge;

/// Error types for a single borrow attempt
#[derive(Debug, thiserror::Error)]
pub enum BorrowError {
    #[error("No connection available for node {0} within the borrow wait")]
    Exhausted(NodeAddress),

    #[error("The pool has been closed")]
    Closed,

    #[error("Node {0} is not registered with the pool")]
    UnknownNode(NodeAddress),

    #[error("Failed to create connection to {address}: {source}")]
    CreateFailed {
        address: NodeAddress,
        #[source]
        source: anyhow::Error,
    },
}

/// Receives connection lifecycle events from the keyed pool
///
/// `gauge` identifies the sub-pool a connection belongs to. A node that is
/// removed and registered again gets a new sub-pool and a new gauge, so events
/// for connections of the old one can be told apart.
pub trait LifecycleListener: Send + Sync {
    fn connection_created(&self, address: &str, gauge: &NodeGauge);
    fn connection_destroyed(&self, address: &str, gauge: &NodeGauge);
    fn connection_corrupted(&self, address: &str, gauge: &NodeGauge);

    /// A connection was handed to a caller
    fn connection_checked_out(&self, _address: &str, _gauge: &NodeGauge) {}

    /// A checkout ended, whether by return or by dropping the handle
    fn connection_checked_in(&self, _address: &str, _gauge: &NodeGauge) {}
}

/// Limits applied by the keyed pool; `None` means unbounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedPoolConfig {
    /// Concurrent checkouts per node
    pub max_active_per_key: Option<usize>,

    /// Idle connections kept per node; extra returns are destroyed
    pub max_idle_per_key: Option<usize>,

    /// Idle connections created when a node is prepared
    pub min_idle_per_key: usize,

    /// Live connections across all nodes
    pub max_total: Option<usize>,

    /// How long one borrow waits for a permit
    pub borrow_wait: Duration,

    /// Idle age past which `evict` destroys a connection
    pub min_evictable_idle: Option<Duration>,
}

impl Default for KeyedPoolConfig {
    fn default() -> Self {
        Self {
            max_active_per_key: Some(20),
            max_idle_per_key: Some(10),
            min_idle_per_key: 10,
            max_total: None,
            borrow_wait: Duration::from_millis(100),
            min_evictable_idle: Some(Duration::from_secs(30 * 60)),
        }
    }
}

pub(crate) struct IdleEntry<C> {
    connection: C,
    idle_since: Instant,
    created_at: Instant,
}

/// State for one node; idle entries are ordered oldest first
pub(crate) struct SubPool<C> {
    idle: Mutex<Vec<IdleEntry<C>>>,
    permits: Option<Arc<Semaphore>>,
    pub(crate) gauge: Arc<NodeGauge>,

    /// Set before the final drain; checked under the idle lock
    closed: AtomicBool,
}

impl<C> SubPool<C> {
    fn new(max_active: Option<usize>) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            permits: max_active.map(|n| Arc::new(Semaphore::new(n))),
            gauge: Arc::new(NodeGauge::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Push onto the idle stack
    ///
    /// Hands the connection back if the sub-pool is closed or already holds
    /// `max_idle` entries.
    fn push_idle(&self, entry: IdleEntry<C>, max_idle: Option<usize>) -> Option<C> {
        let mut idle = self.idle.lock();
        if self.closed.load(Ordering::Acquire) {
            return Some(entry.connection);
        }
        if let Some(max_idle) = max_idle {
            if idle.len() >= max_idle {
                return Some(entry.connection);
            }
        }

        idle.push(entry);
        self.gauge.set_idle(idle.len());
        None
    }

    fn take_idle(&self) -> Option<IdleEntry<C>> {
        let mut idle = self.idle.lock();
        let entry = idle.pop();
        self.gauge.set_idle(idle.len());
        entry
    }

    fn drain_idle(&self) -> Vec<IdleEntry<C>> {
        let mut idle = self.idle.lock();
        let drained = std::mem::take(&mut *idle);
        self.gauge.set_idle(0);
        drained
    }

    /// Remove up to `limit` of the oldest entries matching `pred`
    fn drain_oldest(&self, limit: usize, pred: impl Fn(&IdleEntry<C>) -> bool) -> Vec<IdleEntry<C>> {
        let mut idle = self.idle.lock();
        let count = idle.iter().take(limit).take_while(|e| pred(e)).count();
        let drained: Vec<_> = idle.drain(..count).collect();
        self.gauge.set_idle(idle.len());
        drained
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }
}

/// Keyed pool of connections produced by a [`ConnectionFactory`]
pub struct KeyedPool<F: ConnectionFactory> {
    factory: Arc<F>,
    config: KeyedPoolConfig,
    pools: RwLock<HashMap<NodeAddress, Arc<SubPool<F::Connection>>>>,
    total: Arc<AtomicUsize>,
    closed: AtomicBool,
    listener: Arc<dyn LifecycleListener>,
    clock: Arc<dyn Clock>,
}

impl<F: ConnectionFactory> KeyedPool<F> {
    pub fn new(
        factory: Arc<F>,
        config: KeyedPoolConfig,
        listener: Arc<dyn LifecycleListener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            config,
            pools: RwLock::new(HashMap::new()),
            total: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            listener,
            clock,
        }
    }

    pub fn config(&self) -> &KeyedPoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live connections across all nodes, idle or checked out
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn num_active(&self, address: &str) -> usize {
        self.sub_pool(address).map(|p| p.gauge.active()).unwrap_or(0)
    }

    pub fn num_idle(&self, address: &str) -> usize {
        self.sub_pool(address).map(|p| p.gauge.idle()).unwrap_or(0)
    }

    fn sub_pool(&self, address: &str) -> Option<Arc<SubPool<F::Connection>>> {
        self.pools.read().get(address).cloned()
    }

    /// Register a node, returning the gauge of its sub-pool
    pub fn register(&self, address: &str) -> Arc<NodeGauge> {
        let mut pools = self.pools.write();
        let sub_pool = pools
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(SubPool::new(self.config.max_active_per_key)));
        Arc::clone(&sub_pool.gauge)
    }

    /// Fill a node's idle set up to `min_idle_per_key`
    ///
    /// Creation failures stop the warm-up; they are not errors for the caller.
    pub async fn prepare(&self, address: &str) -> usize {
        let Some(sub_pool) = self.sub_pool(address) else {
            return 0;
        };

        let mut target = self.config.min_idle_per_key;
        if let Some(max_idle) = self.config.max_idle_per_key {
            target = target.min(max_idle);
        }

        let mut created = 0;
        while sub_pool.gauge.idle() < target && !self.is_closed() {
            if !self.try_reserve_total() {
                debug!(node = %address, "Pool-wide limit reached while preparing idle connections");
                break;
            }

            match self.factory.create(address).await {
                Ok(connection) => {
                    self.listener.connection_created(address, &sub_pool.gauge);
                    let now = self.clock.now();
                    let entry = IdleEntry {
                        connection,
                        idle_since: now,
                        created_at: now,
                    };
                    // Removed or closed while the connection was being opened
                    if let Some(connection) = sub_pool.push_idle(entry, None) {
                        self.destroy(address, &sub_pool, connection).await;
                        break;
                    }
                    created += 1;
                }
                Err(e) => {
                    self.total.fetch_sub(1, Ordering::Relaxed);
                    warn!(node = %address, error = %e, "Failed to prepare idle connection");
                    break;
                }
            }
        }

        created
    }

    /// Borrow a connection for `address`, waiting at most `borrow_wait`
    pub async fn borrow(&self, address: &str) -> Result<PooledConnection<F::Connection>, BorrowError> {
        if self.is_closed() {
            return Err(BorrowError::Closed);
        }

        let sub_pool = self
            .sub_pool(address)
            .ok_or_else(|| BorrowError::UnknownNode(address.to_string()))?;

        let permit = match &sub_pool.permits {
            Some(permits) => {
                let acquired = tokio::select! {
                    biased;
                    acquired = Arc::clone(permits).acquire_owned() => Some(acquired),
                    _ = self.clock.sleep(self.config.borrow_wait) => None,
                };
                match acquired {
                    None => return Err(BorrowError::Exhausted(address.to_string())),
                    // Semaphores are closed on shutdown and on node removal
                    Some(Err(_)) if self.is_closed() => return Err(BorrowError::Closed),
                    Some(Err(_)) => return Err(BorrowError::UnknownNode(address.to_string())),
                    Some(Ok(permit)) => Some(permit),
                }
            }
            None => None,
        };

        let mut slot = ActiveSlot::new(
            address,
            Arc::clone(&sub_pool),
            permit,
            Arc::clone(&self.total),
            Arc::clone(&self.listener),
        );

        if let Some(entry) = sub_pool.take_idle() {
            slot.hold_total();
            return Ok(PooledConnection {
                address: address.to_string(),
                connection: entry.connection,
                corrupted: false,
                created_at: entry.created_at,
                slot,
            });
        }

        if !self.try_reserve_total() {
            let cleared = self.clear_oldest().await;
            if cleared == 0 || !self.try_reserve_total() {
                // Nothing to reclaim; don't let the caller spin
                self.clock.sleep(self.config.borrow_wait).await;
                return Err(BorrowError::Exhausted(address.to_string()));
            }
        }
        slot.hold_total();

        let connection = self
            .factory
            .create(address)
            .await
            .map_err(|source| BorrowError::CreateFailed {
                address: address.to_string(),
                source,
            })?;
        self.listener.connection_created(address, &sub_pool.gauge);

        Ok(PooledConnection {
            address: address.to_string(),
            connection,
            corrupted: false,
            created_at: self.clock.now(),
            slot,
        })
    }

    /// Return a borrowed connection
    ///
    /// Corrupted, invalid, surplus, orphaned (node removed) and post-close
    /// returns are destroyed; everything else is parked as idle.
    pub async fn give_back(&self, connection: PooledConnection<F::Connection>) {
        let PooledConnection {
            address,
            connection: mut raw,
            corrupted,
            created_at,
            slot,
        } = connection;

        let corrupted = self.factory.on_passivate(&address, &mut raw) || corrupted;
        if corrupted {
            self.listener.connection_corrupted(&address, &slot.sub_pool.gauge);
        }

        let registered = self
            .sub_pool(&address)
            .map(|current| Arc::ptr_eq(&current, &slot.sub_pool))
            .unwrap_or(false);

        let recyclable = registered
            && !corrupted
            && !self.is_closed()
            && self.factory.validate(&address, &raw);

        let raw = if recyclable {
            let entry = IdleEntry {
                connection: raw,
                idle_since: self.clock.now(),
                created_at,
            };
            match slot.sub_pool.push_idle(entry, self.config.max_idle_per_key) {
                None => {
                    slot.release_to_idle();
                    return;
                }
                Some(raw) => raw,
            }
        } else {
            raw
        };

        debug!(node = %address, corrupted, "Destroying returned connection");
        self.factory.destroy(&address, raw).await;
        self.listener.connection_destroyed(&address, &slot.sub_pool.gauge);
        drop(slot);
    }

    /// Destroy every idle connection of a node; returns how many were destroyed
    pub async fn clear(&self, address: &str) -> usize {
        match self.sub_pool(address) {
            Some(sub_pool) => {
                let drained = sub_pool.drain_idle();
                self.destroy_idle(address, &sub_pool, drained).await
            }
            None => 0,
        }
    }

    /// Drop a node entirely; connections still checked out are destroyed on return
    pub async fn remove(&self, address: &str) -> usize {
        let removed = self.pools.write().remove(address);
        match removed {
            Some(sub_pool) => {
                sub_pool.close();
                let drained = sub_pool.drain_idle();
                self.destroy_idle(address, &sub_pool, drained).await
            }
            None => 0,
        }
    }

    /// Destroy idle connections older than `min_evictable_idle`
    pub async fn evict(&self) -> usize {
        let Some(max_age) = self.config.min_evictable_idle else {
            return 0;
        };

        let now = self.clock.now();
        let mut evicted = 0;
        for (address, sub_pool) in self.snapshot() {
            let stale = sub_pool.drain_oldest(usize::MAX, |e| now.saturating_duration_since(e.idle_since) >= max_age);
            evicted += self.destroy_idle(&address, &sub_pool, stale).await;
        }

        if evicted > 0 {
            debug!(evicted, "Evicted idle connections");
        }
        evicted
    }

    /// Make room under `max_total` by destroying roughly the oldest 15% of idle connections
    async fn clear_oldest(&self) -> usize {
        let pools = self.snapshot();

        let mut stamps: Vec<Instant> = pools
            .iter()
            .flat_map(|(_, p)| p.idle.lock().iter().map(|e| e.idle_since).collect::<Vec<_>>())
            .collect();
        if stamps.is_empty() {
            return 0;
        }
        stamps.sort();

        let to_remove = stamps.len() * 15 / 100 + 1;
        let cutoff = stamps[to_remove - 1];

        let mut remaining = to_remove;
        let mut cleared = 0;
        for (address, sub_pool) in pools {
            if remaining == 0 {
                break;
            }
            let victims = sub_pool.drain_oldest(remaining, |e| e.idle_since <= cutoff);
            remaining -= victims.len();
            cleared += self.destroy_idle(&address, &sub_pool, victims).await;
        }

        debug!(cleared, "Cleared oldest idle connections to make room");
        cleared
    }

    /// Close the pool: refuse new borrows and destroy every idle connection
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for (address, sub_pool) in self.snapshot() {
            sub_pool.close();
            let drained = sub_pool.drain_idle();
            self.destroy_idle(&address, &sub_pool, drained).await;
        }
    }

    fn snapshot(&self) -> Vec<(NodeAddress, Arc<SubPool<F::Connection>>)> {
        self.pools
            .read()
            .iter()
            .map(|(address, p)| (address.clone(), Arc::clone(p)))
            .collect()
    }

    fn try_reserve_total(&self) -> bool {
        match self.config.max_total {
            None => {
                self.total.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(max) => self
                .total
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
                .is_ok(),
        }
    }

    /// Destroy a connection that holds a share of the total but no slot
    async fn destroy(&self, address: &str, sub_pool: &SubPool<F::Connection>, connection: F::Connection) {
        self.factory.destroy(address, connection).await;
        self.total.fetch_sub(1, Ordering::Relaxed);
        self.listener.connection_destroyed(address, &sub_pool.gauge);
    }

    async fn destroy_idle(
        &self,
        address: &str,
        sub_pool: &SubPool<F::Connection>,
        entries: Vec<IdleEntry<F::Connection>>,
    ) -> usize {
        let count = entries.len();
        for entry in entries {
            self.destroy(address, sub_pool, entry.connection).await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::clock::{ManualClock, TokioClock};
    use crate::testkit::{MockFactory, RecordingListener};

    fn config() -> KeyedPoolConfig {
        KeyedPoolConfig {
            max_active_per_key: Some(2),
            max_idle_per_key: Some(2),
            min_idle_per_key: 1,
            max_total: None,
            borrow_wait: Duration::from_millis(20),
            min_evictable_idle: Some(Duration::from_secs(60)),
        }
    }

    fn pool(config: KeyedPoolConfig) -> (KeyedPool<MockFactory>, Arc<MockFactory>, Arc<RecordingListener>) {
        pool_with_clock(config, Arc::new(TokioClock))
    }

    fn pool_with_clock(
        config: KeyedPoolConfig,
        clock: Arc<dyn Clock>,
    ) -> (KeyedPool<MockFactory>, Arc<MockFactory>, Arc<RecordingListener>) {
        let factory = Arc::new(MockFactory::new());
        let listener = Arc::new(RecordingListener::default());
        let pool = KeyedPool::new(
            Arc::clone(&factory),
            config,
            Arc::clone(&listener) as Arc<dyn LifecycleListener>,
            clock,
        );
        (pool, factory, listener)
    }

    #[tokio::test]
    async fn test_prepare_creates_min_idle() {
        let (pool, _, listener) = pool(config());
        pool.register("a");

        assert_eq!(pool.prepare("a").await, 1);
        assert_eq!(pool.num_idle("a"), 1);
        assert_eq!(pool.total(), 1);
        assert_eq!(listener.created("a"), 1);
    }

    #[tokio::test]
    async fn test_borrow_reuses_lifo() {
        let (pool, _, _) = pool(config());
        pool.register("a");

        let first = pool.borrow("a").await.unwrap();
        let second = pool.borrow("a").await.unwrap();
        let first_id = first.id;
        let second_id = second.id;

        pool.give_back(first).await;
        pool.give_back(second).await;
        assert_eq!(pool.num_idle("a"), 2);

        // Most recently returned comes out first
        let again = pool.borrow("a").await.unwrap();
        assert_eq!(again.id, second_id);
        assert_ne!(again.id, first_id);
    }

    #[tokio::test]
    async fn test_borrow_and_return_counts() {
        let (pool, _, _) = pool(config());
        pool.register("a");

        let conn = pool.borrow("a").await.unwrap();
        assert_eq!(pool.num_active("a"), 1);
        assert_eq!(pool.num_idle("a"), 0);

        pool.give_back(conn).await;
        assert_eq!(pool.num_active("a"), 0);
        assert_eq!(pool.num_idle("a"), 1);
        assert_eq!(pool.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_when_at_max_active() {
        let (pool, _, _) = pool(config());
        pool.register("a");

        let _c1 = pool.borrow("a").await.unwrap();
        let _c2 = pool.borrow("a").await.unwrap();

        let err = pool.borrow("a").await.unwrap_err();
        assert!(matches!(err, BorrowError::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_waiting_borrow_gets_returned_connection() {
        let mut cfg = config();
        cfg.max_active_per_key = Some(1);
        cfg.borrow_wait = Duration::from_secs(5);
        let (pool, _, listener) = pool(cfg);
        let pool = Arc::new(pool);
        pool.register("a");

        let held = pool.borrow("a").await.unwrap();
        let held_id = held.id;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.borrow("a").await.map(|c| c.id) })
        };
        tokio::task::yield_now().await;
        pool.give_back(held).await;

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(listener.created("a"), 1);
    }

    #[tokio::test]
    async fn test_corrupted_return_is_destroyed() {
        let (pool, _, listener) = pool(config());
        pool.register("a");

        let mut conn = pool.borrow("a").await.unwrap();
        conn.mark_corrupted();
        pool.give_back(conn).await;

        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(listener.corrupted("a"), 1);
        assert_eq!(listener.destroyed("a"), 1);
    }

    #[tokio::test]
    async fn test_factory_detects_corruption_on_passivate() {
        let (pool, factory, listener) = pool(config());
        pool.register("a");

        let conn = pool.borrow("a").await.unwrap();
        factory.corrupt_on_return(conn.id);
        pool.give_back(conn).await;

        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(listener.corrupted("a"), 1);
        assert_eq!(listener.destroyed("a"), 1);
    }

    #[tokio::test]
    async fn test_invalid_return_is_destroyed() {
        let (pool, factory, listener) = pool(config());
        pool.register("a");

        let conn = pool.borrow("a").await.unwrap();
        factory.invalidate(conn.id);
        pool.give_back(conn).await;

        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(listener.destroyed("a"), 1);
        assert_eq!(listener.corrupted("a"), 0);
    }

    #[tokio::test]
    async fn test_surplus_idle_destroyed() {
        let mut cfg = config();
        cfg.max_idle_per_key = Some(1);
        let (pool, factory, listener) = pool(cfg);
        pool.register("a");

        let c1 = pool.borrow("a").await.unwrap();
        let c2 = pool.borrow("a").await.unwrap();
        let c2_id = c2.id;
        pool.give_back(c1).await;
        pool.give_back(c2).await;

        assert_eq!(pool.num_idle("a"), 1);
        assert_eq!(listener.destroyed("a"), 1);
        assert_eq!(factory.destroyed(), vec![c2_id]);
    }

    #[tokio::test]
    async fn test_create_failure() {
        let (pool, factory, _) = pool(config());
        pool.register("a");
        factory.fail_node("a");

        let err = pool.borrow("a").await.unwrap_err();
        assert!(matches!(err, BorrowError::CreateFailed { .. }));
        assert_eq!(pool.num_active("a"), 0);
        assert_eq!(pool.total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (pool, _, _) = pool(config());
        let err = pool.borrow("nope").await.unwrap_err();
        assert!(matches!(err, BorrowError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_clear_destroys_idle_only() {
        let (pool, _, listener) = pool(config());
        pool.register("a");

        let c1 = pool.borrow("a").await.unwrap();
        let c2 = pool.borrow("a").await.unwrap();
        pool.give_back(c1).await;

        assert_eq!(pool.clear("a").await, 1);
        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(pool.num_active("a"), 1);

        // The checked-out one is still recyclable
        pool.give_back(c2).await;
        assert_eq!(pool.num_idle("a"), 1);
        assert_eq!(listener.destroyed("a"), 1);
    }

    #[tokio::test]
    async fn test_return_after_remove_is_destroyed() {
        let (pool, _, listener) = pool(config());
        pool.register("a");

        let conn = pool.borrow("a").await.unwrap();
        pool.remove("a").await;

        // Re-adding creates a fresh sub-pool; the old connection must not land in it
        pool.register("a");
        pool.give_back(conn).await;

        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(listener.destroyed("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale_idle() {
        let (pool, _, _) = pool(config());
        pool.register("a");
        pool.prepare("a").await;

        assert_eq!(pool.evict().await, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.evict().await, 1);
        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(pool.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_total_clears_oldest() {
        let mut cfg = config();
        cfg.max_total = Some(2);
        cfg.min_idle_per_key = 1;
        let (pool, _, listener) = pool(cfg);
        pool.register("a");
        pool.register("b");
        pool.prepare("a").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        pool.prepare("b").await;
        assert_eq!(pool.total(), 2);

        // "c" has no idle connection, so one must be created; a's is the oldest
        pool.register("c");
        let conn = pool.borrow("c").await.unwrap();

        assert_eq!(listener.destroyed("a"), 1);
        assert_eq!(pool.num_idle("b"), 1);
        assert_eq!(pool.total(), 2);
        pool.give_back(conn).await;
    }

    #[tokio::test]
    async fn test_close() {
        let (pool, _, listener) = pool(config());
        pool.register("a");
        pool.prepare("a").await;
        let conn = pool.borrow("a").await.unwrap();

        pool.close().await;
        assert!(matches!(pool.borrow("a").await, Err(BorrowError::Closed)));

        // Late returns are destroyed, not recycled
        pool.give_back(conn).await;
        assert_eq!(pool.num_idle("a"), 0);
        assert_eq!(listener.destroyed("a"), 1);
        assert_eq!(pool.total(), 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let mut cfg = config();
        cfg.max_active_per_key = Some(1);
        let (pool, _, listener) = pool(cfg);
        pool.register("a");

        let conn = pool.borrow("a").await.unwrap();
        assert_eq!(listener.checked_out(), 1);
        drop(conn);

        assert_eq!(pool.num_active("a"), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(listener.checked_out(), 0);
        assert!(pool.borrow("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_borrow_wait_runs_on_pool_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut cfg = config();
        cfg.max_active_per_key = Some(1);
        cfg.borrow_wait = Duration::from_secs(30);
        let (pool, _, _) = pool_with_clock(cfg, Arc::clone(&clock) as Arc<dyn Clock>);
        pool.register("a");

        let _held = pool.borrow("a").await.unwrap();
        let start = clock.now();

        // Would hang for 30s if the wait used wall-clock time
        let result = tokio::time::timeout(Duration::from_secs(5), pool.borrow("a")).await;

        assert!(matches!(result, Ok(Err(BorrowError::Exhausted(_)))));
        assert_eq!(clock.now() - start, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_events_carry_sub_pool_identity() {
        let (pool, _, listener) = pool(config());
        let first = pool.register("a");
        let conn = pool.borrow("a").await.unwrap();

        pool.remove("a").await;
        let second = pool.register("a");
        assert!(!Arc::ptr_eq(&first, &second));

        pool.give_back(conn).await;
        assert_eq!(listener.destroyed_from(&first), 1);
        assert_eq!(listener.destroyed_from(&second), 0);
    }
}
