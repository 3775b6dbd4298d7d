//! In-memory factory and listener for unit tests

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::factory::ConnectionFactory;
use crate::lb::NodeGauge;
use crate::pool::LifecycleListener;

#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    pub address: String,
}

#[derive(Debug, Default)]
pub struct MockFactory {
    next_id: AtomicU64,
    invalid: Mutex<HashSet<u64>>,
    corrupt: Mutex<HashSet<u64>>,
    failing: Mutex<HashSet<String>>,
    destroyed: Mutex<Vec<u64>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `validate` reject this connection
    pub fn invalidate(&self, id: u64) {
        self.invalid.lock().insert(id);
    }

    /// Make `on_passivate` report this connection as corrupted
    pub fn corrupt_on_return(&self, id: u64) {
        self.corrupt.lock().insert(id);
    }

    /// Make `create` fail for this node
    pub fn fail_node(&self, address: &str) {
        self.failing.lock().insert(address.to_string());
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.destroyed.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self, address: &str) -> Result<MockConnection> {
        if self.failing.lock().contains(address) {
            anyhow::bail!("connection refused by {}", address);
        }
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            address: address.to_string(),
        })
    }

    async fn destroy(&self, _address: &str, connection: MockConnection) {
        self.destroyed.lock().push(connection.id);
    }

    fn validate(&self, _address: &str, connection: &MockConnection) -> bool {
        !self.invalid.lock().contains(&connection.id)
    }

    fn on_passivate(&self, _address: &str, connection: &mut MockConnection) -> bool {
        self.corrupt.lock().contains(&connection.id)
    }
}

#[derive(Debug, Default)]
pub struct RecordingListener {
    created: Mutex<HashMap<String, u64>>,
    destroyed: Mutex<HashMap<String, u64>>,
    corrupted: Mutex<HashMap<String, u64>>,
    destroyed_by_gauge: Mutex<HashMap<usize, u64>>,
    checked_out: AtomicUsize,
}

impl RecordingListener {
    pub fn created(&self, address: &str) -> u64 {
        self.created.lock().get(address).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, address: &str) -> u64 {
        self.destroyed.lock().get(address).copied().unwrap_or(0)
    }

    pub fn corrupted(&self, address: &str) -> u64 {
        self.corrupted.lock().get(address).copied().unwrap_or(0)
    }

    /// Destroy events attributed to the sub-pool owning `gauge`
    pub fn destroyed_from(&self, gauge: &NodeGauge) -> u64 {
        let key = gauge as *const NodeGauge as usize;
        self.destroyed_by_gauge.lock().get(&key).copied().unwrap_or(0)
    }

    /// Connections currently checked out
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::Relaxed)
    }
}

impl LifecycleListener for RecordingListener {
    fn connection_created(&self, address: &str, _gauge: &NodeGauge) {
        *self.created.lock().entry(address.to_string()).or_default() += 1;
    }

    fn connection_destroyed(&self, address: &str, gauge: &NodeGauge) {
        *self.destroyed.lock().entry(address.to_string()).or_default() += 1;
        let key = gauge as *const NodeGauge as usize;
        *self.destroyed_by_gauge.lock().entry(key).or_default() += 1;
    }

    fn connection_corrupted(&self, address: &str, _gauge: &NodeGauge) {
        *self.corrupted.lock().entry(address.to_string()).or_default() += 1;
    }

    fn connection_checked_out(&self, _address: &str, _gauge: &NodeGauge) {
        self.checked_out.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_checked_in(&self, _address: &str, _gauge: &NodeGauge) {
        self.checked_out.fetch_sub(1, Ordering::Relaxed);
    }
}
