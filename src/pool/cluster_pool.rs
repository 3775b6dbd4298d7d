//! Pool orchestrator
//!
//! [`ClusterPool`] ties the node registry, the keyed backing pool and the two
//! strategies together. Callers only ever see `acquire`/`release`; membership,
//! suspension and eviction are handled by the maintenance task.

use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::acquire::Acquire;
use super::clock::{Clock, TokioClock};
use super::connection::PooledConnection;
use super::keyed::{KeyedPool, LifecycleListener};
use super::maintenance::ScheduledTask;
use super::policy::Policy;
use super::stats::{RunningStatistics, StatisticsSnapshot};
use crate::cluster::{ConnectionParams, NodeAddress, StaticTopology, TopologyProvider};
use crate::factory::ConnectionFactory;
use crate::lb::{
    LeastLoadedSelection, NeverSuspend, NodeGauge, NodeSelectionStrategy, NodeSnapshot,
    NodeSuspensionStrategy, PooledNode,
};

/// Errors surfaced by [`ClusterPool::acquire`]
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("No connections available after waiting {waited:?}")]
    NoConnectionsAvailable { waited: Duration },

    #[error("The pool has been shut down")]
    PoolShutdown,
}

/// Tracked nodes plus the process-wide counters
///
/// Also the keyed pool's lifecycle listener, so factory events land on the
/// right node record. Events for connections of a removed record only move
/// the process-wide counters.
pub(crate) struct NodeTable {
    nodes: DashMap<NodeAddress, Arc<PooledNode>>,
    pub(crate) stats: RunningStatistics,
}

impl NodeTable {
    fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            stats: RunningStatistics::new(),
        }
    }

    pub(crate) fn get(&self, address: &str) -> Option<Arc<PooledNode>> {
        self.nodes.get(address).map(|node| Arc::clone(node.value()))
    }

    pub(crate) fn candidates(&self) -> Vec<Arc<PooledNode>> {
        self.nodes.iter().map(|node| Arc::clone(node.value())).collect()
    }

    /// The record for `address`, if it is still the one reading `gauge`
    pub(crate) fn current(&self, address: &str, gauge: &NodeGauge) -> Option<Arc<PooledNode>> {
        self.get(address).filter(|node| node.is_backed_by(gauge))
    }

    fn addresses(&self) -> Vec<NodeAddress> {
        self.nodes.iter().map(|node| node.key().clone()).collect()
    }
}

impl LifecycleListener for NodeTable {
    fn connection_created(&self, address: &str, gauge: &NodeGauge) {
        self.stats.connection_created();
        if let Some(node) = self.current(address, gauge) {
            node.report_connection_created();
        }
    }

    fn connection_destroyed(&self, address: &str, gauge: &NodeGauge) {
        self.stats.connection_destroyed();
        if let Some(node) = self.current(address, gauge) {
            node.report_connection_destroyed();
        }
    }

    fn connection_corrupted(&self, address: &str, gauge: &NodeGauge) {
        self.stats.connection_corrupted();
        if let Some(node) = self.current(address, gauge) {
            node.report_connection_corrupted();
        }
    }

    fn connection_checked_out(&self, _address: &str, _gauge: &NodeGauge) {
        self.stats.connection_checked_out();
    }

    fn connection_checked_in(&self, _address: &str, _gauge: &NodeGauge) {
        self.stats.connection_checked_in();
    }
}

pub(crate) struct Inner<F: ConnectionFactory> {
    pub(crate) keyed: KeyedPool<F>,
    pub(crate) table: Arc<NodeTable>,
    pub(crate) policy: Policy,
    pub(crate) selection: Arc<dyn NodeSelectionStrategy>,
    suspension: Arc<dyn NodeSuspensionStrategy>,
    topology: Arc<dyn TopologyProvider>,
    pub(crate) clock: Arc<dyn Clock>,

    /// Held for the whole of a maintenance tick
    tick_lock: tokio::sync::Mutex<()>,

    /// Serializes node additions and removals
    membership: tokio::sync::Mutex<()>,

    maintenance: Mutex<Option<ScheduledTask>>,
}

impl<F: ConnectionFactory> Inner<F> {
    async fn add_node(&self, address: &str) -> bool {
        let _membership = self.membership.lock().await;

        match self.table.nodes.entry(address.to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(entry) => {
                let gauge = self.keyed.register(address);
                entry.insert(Arc::new(PooledNode::new(address, gauge)));
            }
        }

        info!(node = %address, "Adding node to the pool");
        // The node is selectable before its idle connections exist
        let prepared = self.keyed.prepare(address).await;
        debug!(node = %address, prepared, "Prepared idle connections");
        true
    }

    async fn remove_node(&self, address: &str) -> bool {
        let _membership = self.membership.lock().await;

        if self.table.nodes.remove(address).is_none() {
            return false;
        }

        info!(node = %address, "Removing node from the pool");
        let destroyed = self.keyed.remove(address).await;
        debug!(node = %address, destroyed, "Closed idle connections of removed node");
        true
    }

    /// One tick: refresh, suspension, eviction
    ///
    /// A failed refresh leaves membership as it was; the remaining steps still
    /// run and the refresh error is returned at the end.
    async fn run_maintenance(&self) -> anyhow::Result<()> {
        let _tick = self.tick_lock.lock().await;
        if self.keyed.is_closed() {
            return Ok(());
        }

        debug!("Running maintenance");
        let refreshed = self.refresh_topology().await;
        self.evaluate_suspensions().await;

        let evicted = self.keyed.evict().await;
        debug!(evicted, refreshed = refreshed.is_ok(), "Finished maintenance");
        refreshed
    }

    async fn refresh_topology(&self) -> anyhow::Result<()> {
        self.topology
            .refresh()
            .await
            .context("Failed to refresh cluster topology")?;

        let current = self.topology.current_nodes();
        let listed: HashSet<&str> = current.iter().map(|node| node.address.as_str()).collect();

        for node in &current {
            if self.table.get(&node.address).is_none() {
                self.add_node(&node.address).await;
            }
        }

        for address in self.table.addresses() {
            if !listed.contains(address.as_str()) {
                self.remove_node(&address).await;
            }
        }

        Ok(())
    }

    async fn evaluate_suspensions(&self) {
        let nodes = self.table.candidates();
        let mut suspended = 0;

        for node in &nodes {
            let was_suspended = node.is_suspended();
            if !self.suspension.evaluate(node) {
                continue;
            }

            suspended += 1;
            if !was_suspended {
                info!(node = %node.address(), "Node suspended; closing its idle connections");
                self.keyed.clear(node.address()).await;
                node.report_suspension();
            }
        }

        self.table
            .stats
            .set_node_counts(nodes.len() - suspended, suspended);
    }
}

/// Builder for [`ClusterPool`]
pub struct ClusterPoolBuilder<F: ConnectionFactory> {
    factory: Arc<F>,
    topology: Arc<dyn TopologyProvider>,
    policy: Policy,
    selection: Arc<dyn NodeSelectionStrategy>,
    suspension: Arc<dyn NodeSuspensionStrategy>,
    clock: Arc<dyn Clock>,
}

impl<F: ConnectionFactory> ClusterPoolBuilder<F> {
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn selection(mut self, selection: Arc<dyn NodeSelectionStrategy>) -> Self {
        self.selection = selection;
        self
    }

    pub fn suspension(mut self, suspension: Arc<dyn NodeSuspensionStrategy>) -> Self {
        self.suspension = suspension;
        self
    }

    /// Clock used for acquire deadlines, borrow waits, backoff and idle ages
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the initial nodes and start maintenance
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> ClusterPool<F> {
        let table = Arc::new(NodeTable::new());
        let keyed = KeyedPool::new(
            self.factory,
            self.policy.keyed_pool_config(),
            Arc::clone(&table) as Arc<dyn LifecycleListener>,
            Arc::clone(&self.clock),
        );

        let inner = Arc::new(Inner {
            keyed,
            table,
            policy: self.policy,
            selection: self.selection,
            suspension: self.suspension,
            topology: self.topology,
            clock: self.clock,
            tick_lock: tokio::sync::Mutex::new(()),
            membership: tokio::sync::Mutex::new(()),
            maintenance: Mutex::new(None),
        });

        for node in inner.topology.current_nodes() {
            inner.add_node(&node.address).await;
        }
        let tracked = inner.table.nodes.len();
        inner.table.stats.set_node_counts(tracked, 0);

        match inner.policy.maintenance_interval() {
            Some(delay) => {
                let weak: Weak<Inner<F>> = Arc::downgrade(&inner);
                let task = ScheduledTask::spawn("pool-maintenance", delay, move || {
                    let inner = weak.upgrade()?;
                    Some(async move { inner.run_maintenance().await })
                });
                *inner.maintenance.lock() = Some(task);
            }
            None => {
                warn!(
                    "Maintenance disabled; node discovery, node suspension and idle eviction \
                     will not run for this pool"
                );
            }
        }

        info!(nodes = tracked, "Cluster pool started");
        ClusterPool { inner }
    }
}

/// Connection pool spanning every node of a cluster
///
/// Cheap to clone; clones share the same pool.
pub struct ClusterPool<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: ConnectionFactory> Clone for ClusterPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ClusterPool<F> {
    /// Start building a pool over the nodes reported by `topology`
    pub fn builder(factory: F, topology: Arc<dyn TopologyProvider>) -> ClusterPoolBuilder<F> {
        ClusterPoolBuilder {
            factory: Arc::new(factory),
            topology,
            policy: Policy::default(),
            selection: Arc::new(LeastLoadedSelection),
            suspension: Arc::new(NeverSuspend),
            clock: Arc::new(TokioClock),
        }
    }

    /// Pool over a fixed list of addresses with the default policy and strategies
    pub async fn with_nodes<I, S>(factory: F, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddress>,
    {
        let topology = StaticTopology::new(addresses, ConnectionParams::default());
        Self::builder(factory, Arc::new(topology)).build().await
    }

    /// Borrow a connection from the best eligible node
    ///
    /// `exclude` names a node that must not be chosen, typically the one a
    /// previous attempt just failed on. Fails with
    /// [`PoolError::NoConnectionsAvailable`] once `max_wait_for_connection`
    /// has elapsed, or at once with [`PoolError::PoolShutdown`].
    pub async fn acquire(&self, exclude: Option<&str>) -> Result<PooledConnection<F::Connection>, PoolError> {
        Acquire::new(&self.inner, exclude).run().await
    }

    /// Hand a connection back
    ///
    /// Corrupted or invalid connections are destroyed instead of recycled.
    pub async fn release(&self, connection: PooledConnection<F::Connection>) {
        let node = self.inner.table.current(connection.address(), connection.gauge());

        self.inner.keyed.give_back(connection).await;

        self.inner.table.stats.connection_released();
        if let Some(node) = node {
            node.report_connection_released();
        }
    }

    /// Health record of a tracked node
    pub fn pooled_node(&self, address: &str) -> Option<Arc<PooledNode>> {
        self.inner.table.get(address)
    }

    /// Per-node metrics, sorted by address
    pub fn node_snapshots(&self) -> Vec<NodeSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .table
            .candidates()
            .iter()
            .map(|node| node.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.table.stats.snapshot()
    }

    /// Live connections across all nodes, idle or checked out
    pub fn total_connections(&self) -> usize {
        self.inner.keyed.total()
    }

    pub fn policy(&self) -> &Policy {
        &self.inner.policy
    }

    /// Start tracking a node; returns false if it is already tracked
    pub async fn add_node(&self, address: &str) -> bool {
        self.inner.add_node(address).await
    }

    /// Stop tracking a node and close its idle connections
    ///
    /// Its statistics are discarded. Connections still checked out are
    /// destroyed when released.
    pub async fn remove_node(&self, address: &str) -> bool {
        self.inner.remove_node(address).await
    }

    /// Run one maintenance tick now, waiting for a scheduled one in progress
    pub async fn run_maintenance(&self) -> anyhow::Result<()> {
        self.inner.run_maintenance().await
    }

    /// Stop maintenance and close every idle connection
    ///
    /// Connections still checked out stay with their callers; releasing them
    /// afterwards destroys them.
    pub async fn shutdown(&self) {
        let task = self.inner.maintenance.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        self.inner.keyed.close().await;
        info!("Cluster pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.keyed.is_closed()
    }
}

impl<F: ConnectionFactory> fmt::Debug for ClusterPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterPool")
            .field("nodes", &self.inner.table.nodes.len())
            .field("total_connections", &self.inner.keyed.total())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
