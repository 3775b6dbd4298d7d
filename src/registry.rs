//! Named pools
//!
//! Applications talking to several clusters (or several keyspaces of one)
//! register one [`ClusterPool`] per name and shut them all down together.

use dashmap::DashMap;
use tracing::info;

use crate::factory::ConnectionFactory;
use crate::pool::ClusterPool;

pub struct PoolRegistry<F: ConnectionFactory> {
    pools: DashMap<String, ClusterPool<F>>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// Register a pool, returning the one it replaced
    ///
    /// A replaced pool is not shut down; that is left to the caller.
    pub fn add(&self, name: impl Into<String>, pool: ClusterPool<F>) -> Option<ClusterPool<F>> {
        self.pools.insert(name.into(), pool)
    }

    pub fn get(&self, name: &str) -> Option<ClusterPool<F>> {
        self.pools.get(name).map(|pool| pool.value().clone())
    }

    /// Unregister a pool and shut it down
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.pools.remove(name);
        match removed {
            Some((_, pool)) => {
                pool.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Shut down every registered pool and empty the registry
    pub async fn shutdown_all(&self) {
        info!(pools = self.pools.len(), "Shutting down all pools");

        let names = self.names();
        for name in names {
            if let Some((_, pool)) = self.pools.remove(&name) {
                pool.shutdown().await;
            }
        }

        info!("All pools shut down");
    }
}

impl<F: ConnectionFactory> Default for PoolRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Policy;
    use crate::testkit::MockFactory;
    use crate::{ConnectionParams, StaticTopology};
    use std::sync::Arc;

    async fn pool(nodes: &[&str]) -> ClusterPool<MockFactory> {
        let topology = StaticTopology::new(nodes.iter().copied(), ConnectionParams::default());
        let policy = Policy {
            maintenance_interval_millis: 0,
            min_idle_per_node: 0,
            ..Policy::default()
        };
        ClusterPool::builder(MockFactory::new(), Arc::new(topology))
            .policy(policy)
            .build()
            .await
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = PoolRegistry::new();
        registry.add("main", pool(&["a"]).await);
        registry.add("reports", pool(&["b"]).await);

        assert_eq!(registry.names(), vec!["main", "reports"]);
        assert!(registry.get("main").unwrap().pooled_node("a").is_some());
        assert!(registry.get("missing").is_none());

        let main = registry.get("main").unwrap();
        assert!(registry.remove("main").await);
        assert!(main.is_shutdown());
        assert!(!registry.remove("main").await);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let registry = PoolRegistry::new();
        registry.add("one", pool(&["a"]).await);
        registry.add("two", pool(&["b"]).await);
        let one = registry.get("one").unwrap();
        let two = registry.get("two").unwrap();

        registry.shutdown_all().await;

        assert!(registry.is_empty());
        assert!(one.is_shutdown());
        assert!(two.is_shutdown());
    }
}
