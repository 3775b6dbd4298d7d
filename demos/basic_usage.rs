//! Basic usage example for clusterpool
//!
//! This example pools TCP connections to a few local listeners standing in
//! for cluster nodes.
//!
//! Run with:
//! ```
//! cargo run --example basic_usage
//! ```

use clusterpool::{ClusterPool, ConnectionParams, Policy, StaticTopology, TcpConnectionFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Two "nodes" on loopback sharing one listener
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut accepted = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            accepted.push(socket);
        }
    });

    let params = ConnectionParams {
        port,
        connect_timeout: Duration::from_secs(1),
    };
    let topology = StaticTopology::new(["127.0.0.1", "localhost"], params.clone());

    let policy = Policy {
        max_active_per_node: 4,
        min_idle_per_node: 2,
        max_idle_per_node: 4,
        max_wait_for_connection_millis: 500,
        ..Policy::default()
    };

    println!("clusterpool - Basic Usage Example");
    println!("=================================\n");

    let pool = ClusterPool::builder(TcpConnectionFactory::new(params), Arc::new(topology))
        .policy(policy)
        .build()
        .await;

    // Example 1: Borrow and return
    println!("1. Acquiring a connection...");
    let connection = pool.acquire(None).await?;
    println!("   Got connection to {} (peer {})", connection.address(), connection.peer_addr()?);
    let first = connection.address().to_string();
    pool.release(connection).await;
    println!("   Released\n");

    // Example 2: Steer away from a node
    println!("2. Acquiring while excluding {}...", first);
    let connection = pool.acquire(Some(&first)).await?;
    println!("   Got connection to {}\n", connection.address());
    pool.release(connection).await;

    // Example 3: Inspect the pool
    println!("3. Node table:");
    for node in pool.node_snapshots() {
        println!(
            "   - {} active={} idle={} created={}",
            node.address, node.active, node.idle, node.connections_created
        );
    }
    let stats = pool.statistics();
    println!(
        "\n   borrowed={} released={} active={}",
        stats.connections_borrowed_total, stats.connections_released_total, stats.connections_active
    );

    pool.shutdown().await;
    println!("\nPool shut down");

    Ok(())
}
