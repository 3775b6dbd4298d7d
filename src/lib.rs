//! clusterpool - Client-side connection pooling for clustered services
//!
//! One [`ClusterPool`] spreads connections over every node of a cluster,
//! picks the least loaded healthy node for each `acquire`, and suspends nodes
//! that keep handing back corrupted connections.

pub mod cluster;
pub mod config;
pub mod factory;
pub mod lb;
pub mod pool;
pub mod registry;

#[cfg(test)]
mod testkit;

pub use cluster::{ClusterNode, ConnectionParams, NodeAddress, StaticTopology, TopologyProvider};
pub use config::Config;
pub use factory::{ConnectionFactory, TcpConnectionFactory};
pub use lb::{NodeSelectionStrategy, NodeSnapshot, NodeSuspensionStrategy, PooledNode, SuspensionState};
pub use pool::{ClusterPool, Policy, PoolError, PooledConnection, StatisticsSnapshot};
pub use registry::PoolRegistry;
