//! Connection pooling module
//!
//! This module provides:
//! - A keyed backing pool with one LIFO sub-pool per node
//! - The cluster-wide orchestrator with bounded-wait acquisition
//! - Fixed-delay maintenance (membership refresh, suspension, idle eviction)
//! - Process-wide running statistics

mod acquire;
pub mod clock;
pub mod cluster_pool;
pub mod connection;
pub mod keyed;
pub mod maintenance;
pub mod policy;
pub mod stats;

pub use clock::{Clock, ManualClock, TokioClock};
pub use cluster_pool::{ClusterPool, ClusterPoolBuilder, PoolError};
pub use connection::PooledConnection;
pub use keyed::{BorrowError, KeyedPool, KeyedPoolConfig, LifecycleListener};
pub use maintenance::ScheduledTask;
pub use policy::Policy;
pub use stats::{RunningStatistics, StatisticsSnapshot};
