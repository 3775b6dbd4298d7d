//! CLI module for clusterpool
//!
//! Operational commands for inspecting and exercising a pool built from a
//! YAML file or from `CLUSTERPOOL_*` environment variables.
//!
//! # Usage
//!
//! ```bash
//! # Per-node connection counts after start-up
//! clusterpool --config pool.yaml nodes
//!
//! # Running statistics as JSON
//! clusterpool stats --json
//!
//! # 16 workers borrowing and releasing for 30 seconds
//! clusterpool soak --workers 16 --duration 30 --hold-ms 5
//!
//! # Connect once to every configured node
//! clusterpool probe
//! ```

pub mod commands;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use clusterpool::{ClusterPool, Config, TcpConnectionFactory};

/// Build a pool over TCP connections from the loaded configuration
pub async fn build_pool(config: &Config) -> Result<ClusterPool<TcpConnectionFactory>> {
    config.validate().context("Invalid configuration")?;

    debug!(
        nodes = config.cluster.nodes.len(),
        port = config.cluster.port,
        selection = ?config.selection.strategy,
        suspension = ?config.suspension.strategy,
        "Building pool"
    );

    let factory = TcpConnectionFactory::new(config.cluster.connection_params());
    let pool = ClusterPool::builder(factory, Arc::new(config.cluster.topology()))
        .policy(config.pool.clone())
        .selection(config.selection.strategy.build())
        .suspension(config.suspension.build())
        .build()
        .await;

    Ok(pool)
}
