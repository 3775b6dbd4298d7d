//! Example demonstrating a custom connection factory and suspension strategy
//!
//! This example shows how to:
//! 1. Plug in your own connection type through `ConnectionFactory`
//! 2. Suspend nodes with your own `NodeSuspensionStrategy`
//! 3. Report corrupted connections so the strategy can react
//! 4. Monitor pool statistics

use anyhow::Result;
use async_trait::async_trait;
use clusterpool::lb::FixedSuspension;
use clusterpool::{
    ClusterPool, ConnectionFactory, ConnectionParams, NodeSuspensionStrategy, Policy, PooledNode,
    StaticTopology,
};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A pretend session to a node; some sessions go bad
#[derive(Debug)]
struct Session {
    id: u64,
    flaky: bool,
}

#[derive(Debug, Default)]
struct SessionFactory {
    next_id: AtomicU64,
}

#[async_trait]
impl ConnectionFactory for SessionFactory {
    type Connection = Session;

    async fn create(&self, address: &str) -> Result<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Session {
            id,
            flaky: address == "node-3",
        })
    }

    async fn destroy(&self, address: &str, session: Session) {
        info!(node = %address, session = session.id, "Closing session");
    }

    fn validate(&self, _address: &str, _session: &Session) -> bool {
        true
    }
}

/// Suspends any node that has ever returned more than `limit` corrupted sessions
#[derive(Debug)]
struct LifetimeCorruptionLimit {
    limit: u64,
}

impl NodeSuspensionStrategy for LifetimeCorruptionLimit {
    fn evaluate(&self, node: &PooledNode) -> bool {
        let suspended = node.connections_corrupted() > self.limit;
        node.set_suspension_state(Some(Box::new(FixedSuspension(suspended))));
        suspended
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let topology = StaticTopology::new(["node-1", "node-2", "node-3"], ConnectionParams::default());

    let policy = Policy {
        max_active_per_node: 8,
        min_idle_per_node: 1,
        // Ticks are driven by hand below
        maintenance_interval_millis: 0,
        ..Policy::default()
    };

    let pool = ClusterPool::builder(SessionFactory::default(), Arc::new(topology))
        .policy(policy)
        .suspension(Arc::new(LifetimeCorruptionLimit { limit: 5 }))
        .build()
        .await;

    for round in 1..=3 {
        for _ in 0..30 {
            let mut session = pool.acquire(None).await?;

            // Simulate a failed exchange on the flaky node
            if session.flaky && rand::thread_rng().gen_bool(0.5) {
                warn!(node = %session.address(), session = session.id, "Exchange failed");
                session.mark_corrupted();
            }
            pool.release(session).await;
        }

        pool.run_maintenance().await?;

        println!("\nAfter round {}:", round);
        for node in pool.node_snapshots() {
            println!(
                "  {} suspended={} borrowed={} corrupted={}",
                node.address, node.suspended, node.connections_borrowed_total, node.connections_corrupted
            );
        }
    }

    let stats = pool.statistics();
    println!("\nPool Statistics:");
    println!("  Nodes active:    {}", stats.nodes_active);
    println!("  Nodes suspended: {}", stats.nodes_suspended);
    println!("  Created:         {}", stats.connections_created);
    println!("  Destroyed:       {}", stats.connections_destroyed);
    println!("  Corrupted:       {}", stats.connections_corrupted);

    pool.shutdown().await;
    Ok(())
}
