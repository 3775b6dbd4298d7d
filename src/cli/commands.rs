use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use clusterpool::{
    ClusterPool, Config, ConnectionFactory, NodeSnapshot, PoolError, StatisticsSnapshot,
    TcpConnectionFactory,
};

type TcpPool = ClusterPool<TcpConnectionFactory>;

/// Print the per-node table
pub fn cmd_nodes(pool: &TcpPool) -> Result<()> {
    let snapshots = pool.node_snapshots();
    if snapshots.is_empty() {
        println!("No nodes tracked");
        return Ok(());
    }

    println!(
        "{:<32} {:>9} {:>6} {:>6} {:>8} {:>9} {:>9}",
        "NODE", "SUSPENDED", "ACTIVE", "IDLE", "CREATED", "DESTROYED", "CORRUPTED"
    );
    for node in &snapshots {
        println!(
            "{:<32} {:>9} {:>6} {:>6} {:>8} {:>9} {:>9}",
            node.address,
            if node.suspended { "yes" } else { "no" },
            node.active,
            node.idle,
            node.connections_created,
            node.connections_destroyed,
            node.connections_corrupted,
        );
    }

    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    statistics: StatisticsSnapshot,
    nodes: Vec<NodeSnapshot>,
}

/// Print running statistics, as text or JSON
pub fn cmd_stats(pool: &TcpPool, json: bool) -> Result<()> {
    let report = StatsReport {
        statistics: pool.statistics(),
        nodes: pool.node_snapshots(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_statistics(&report.statistics);
    Ok(())
}

fn print_statistics(stats: &StatisticsSnapshot) {
    println!("Statistics at {}", stats.taken_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    println!("  Nodes active:          {}", stats.nodes_active);
    println!("  Nodes suspended:       {}", stats.nodes_suspended);
    println!("  Connections created:   {}", stats.connections_created);
    println!("  Connections destroyed: {}", stats.connections_destroyed);
    println!("  Connections corrupted: {}", stats.connections_corrupted);
    println!("  Connections active:    {}", stats.connections_active);
    println!("  Borrowed (total):      {}", stats.connections_borrowed_total);
    println!("  Released (total):      {}", stats.connections_released_total);
}

/// Borrow and release from many workers at once, then report
pub async fn cmd_soak(pool: &TcpPool, workers: usize, duration: u64, hold_ms: u64) -> Result<()> {
    let workers = workers.max(1);
    let test_duration = Duration::from_secs(duration);
    let hold = Duration::from_millis(hold_ms);

    println!("Running soak test: {} workers for {} seconds...", workers, duration);

    let succeeded = Arc::new(AtomicU64::new(0));
    let timed_out = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let pool = pool.clone();
            let succeeded = Arc::clone(&succeeded);
            let timed_out = Arc::clone(&timed_out);

            tokio::spawn(async move {
                while start.elapsed() < test_duration {
                    match pool.acquire(None).await {
                        Ok(connection) => {
                            tokio::time::sleep(hold).await;
                            pool.release(connection).await;
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PoolError::NoConnectionsAvailable { waited }) => {
                            debug!(worker, waited_ms = waited.as_millis() as u64, "Acquire timed out");
                            timed_out.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PoolError::PoolShutdown) => break,
                    }
                }
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!(error = %e, "Soak worker ended abnormally");
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    let ok = succeeded.load(Ordering::Relaxed);
    println!(
        "Acquired {} connections in {:.2}s = {:.1}/s ({} timed out)",
        ok,
        elapsed,
        ok as f64 / elapsed,
        timed_out.load(Ordering::Relaxed)
    );
    println!();
    print_statistics(&pool.statistics());

    Ok(())
}

/// Open, validate and close one connection per configured node
///
/// Returns the number of nodes that failed.
pub async fn cmd_probe(config: &Config) -> Result<usize> {
    let factory = TcpConnectionFactory::new(config.cluster.connection_params());
    let mut failures = 0;

    for address in &config.cluster.nodes {
        let start = Instant::now();
        match factory.create(address).await {
            Ok(connection) => {
                let valid = factory.validate(address, &connection);
                let elapsed = start.elapsed();
                factory.destroy(address, connection).await;

                if valid {
                    println!("{:<32} OK    {:>8.2}ms", address, elapsed.as_secs_f64() * 1000.0);
                } else {
                    failures += 1;
                    println!("{:<32} FAIL  connection closed by peer", address);
                }
            }
            Err(e) => {
                failures += 1;
                println!("{:<32} FAIL  {:#}", address, e);
            }
        }
    }

    Ok(failures)
}
