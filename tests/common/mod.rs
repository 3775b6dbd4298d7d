//! Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use clusterpool::lb::FixedSuspension;
use clusterpool::{
    ClusterPool, ConnectionFactory, ConnectionParams, NodeSuspensionStrategy, Policy, PooledNode,
    StaticTopology,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct FakeConnection {
    pub id: u64,
    pub node: String,
}

/// Factory handing out numbered in-memory connections
#[derive(Debug, Default)]
pub struct FakeFactory {
    next_id: AtomicU64,
    pub destroyed: Mutex<Vec<u64>>,
    refusing: Mutex<HashSet<String>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, node: &str) {
        self.refusing.lock().insert(node.to_string());
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    type Connection = FakeConnection;

    async fn create(&self, address: &str) -> Result<FakeConnection> {
        if self.refusing.lock().contains(address) {
            anyhow::bail!("{} refused the connection", address);
        }
        Ok(FakeConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            node: address.to_string(),
        })
    }

    async fn destroy(&self, _address: &str, connection: FakeConnection) {
        self.destroyed.lock().push(connection.id);
    }

    fn validate(&self, _address: &str, _connection: &FakeConnection) -> bool {
        true
    }
}

/// Suspension controlled from the test body
#[derive(Debug, Default)]
pub struct ManualSuspension {
    suspended: Mutex<HashSet<String>>,
}

impl ManualSuspension {
    pub fn suspend(&self, node: &str) {
        self.suspended.lock().insert(node.to_string());
    }

    pub fn resume(&self, node: &str) {
        self.suspended.lock().remove(node);
    }
}

impl NodeSuspensionStrategy for ManualSuspension {
    fn evaluate(&self, node: &PooledNode) -> bool {
        let suspended = self.suspended.lock().contains(node.address());
        node.set_suspension_state(Some(Box::new(FixedSuspension(suspended))));
        suspended
    }
}

/// Policy with maintenance off, so tests drive ticks explicitly
pub fn test_policy() -> Policy {
    Policy {
        max_active_per_node: 4,
        max_idle_per_node: 4,
        min_idle_per_node: 1,
        max_wait_for_connection_millis: 200,
        maintenance_interval_millis: 0,
        borrow_wait_millis: 20,
        ..Policy::default()
    }
}

pub fn topology(nodes: &[&str]) -> StaticTopology {
    StaticTopology::new(nodes.iter().copied(), ConnectionParams::default())
}

pub async fn build_pool(nodes: &[&str], policy: Policy) -> ClusterPool<FakeFactory> {
    ClusterPool::builder(FakeFactory::new(), Arc::new(topology(nodes)))
        .policy(policy)
        .build()
        .await
}
