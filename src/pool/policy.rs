use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::keyed::KeyedPoolConfig;

/// Pool sizing and timing policy
///
/// Limits follow the usual convention: zero or a negative value means
/// "unbounded" (or "disabled" for the maintenance interval).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Concurrent borrows per node (default: 20)
    #[serde(default = "default_max_active_per_node")]
    pub max_active_per_node: i32,

    /// Live connections across all nodes (default: unbounded)
    #[serde(default = "default_max_total")]
    pub max_total: i32,

    /// Idle connections kept per node (default: 10)
    #[serde(default = "default_max_idle_per_node")]
    pub max_idle_per_node: i32,

    /// Idle connections created when a node is added (default: 10)
    #[serde(default = "default_min_idle_per_node")]
    pub min_idle_per_node: i32,

    /// How long `acquire` keeps trying (default: 1000)
    #[serde(default = "default_max_wait_for_connection_millis")]
    pub max_wait_for_connection_millis: i64,

    /// Delay between maintenance ticks (default: 60000)
    #[serde(default = "default_maintenance_interval_millis")]
    pub maintenance_interval_millis: i64,

    /// Bound on one borrow attempt, and the backoff when no node is eligible (default: 100)
    #[serde(default = "default_borrow_wait_millis")]
    pub borrow_wait_millis: i64,

    /// Idle age past which maintenance destroys a connection (default: 30 minutes)
    #[serde(default = "default_min_evictable_idle_millis")]
    pub min_evictable_idle_millis: i64,
}

fn default_max_active_per_node() -> i32 {
    20
}

fn default_max_total() -> i32 {
    -1
}

fn default_max_idle_per_node() -> i32 {
    10
}

fn default_min_idle_per_node() -> i32 {
    10
}

fn default_max_wait_for_connection_millis() -> i64 {
    1000
}

fn default_maintenance_interval_millis() -> i64 {
    60_000
}

fn default_borrow_wait_millis() -> i64 {
    100
}

fn default_min_evictable_idle_millis() -> i64 {
    30 * 60 * 1000
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_active_per_node: default_max_active_per_node(),
            max_total: default_max_total(),
            max_idle_per_node: default_max_idle_per_node(),
            min_idle_per_node: default_min_idle_per_node(),
            max_wait_for_connection_millis: default_max_wait_for_connection_millis(),
            maintenance_interval_millis: default_maintenance_interval_millis(),
            borrow_wait_millis: default_borrow_wait_millis(),
            min_evictable_idle_millis: default_min_evictable_idle_millis(),
        }
    }
}

fn positive(value: i32) -> Option<usize> {
    (value > 0).then_some(value as usize)
}

fn positive_millis(value: i64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value as u64))
}

impl Policy {
    pub fn max_active_per_node(&self) -> Option<usize> {
        positive(self.max_active_per_node)
    }

    pub fn max_total(&self) -> Option<usize> {
        positive(self.max_total)
    }

    pub fn max_idle_per_node(&self) -> Option<usize> {
        positive(self.max_idle_per_node)
    }

    pub fn min_idle_per_node(&self) -> usize {
        positive(self.min_idle_per_node).unwrap_or(0)
    }

    /// `None` means `acquire` waits until it succeeds
    pub fn max_wait_for_connection(&self) -> Option<Duration> {
        positive_millis(self.max_wait_for_connection_millis)
    }

    /// `None` disables background maintenance
    pub fn maintenance_interval(&self) -> Option<Duration> {
        positive_millis(self.maintenance_interval_millis)
    }

    pub fn borrow_wait(&self) -> Duration {
        positive_millis(self.borrow_wait_millis).unwrap_or(Duration::from_millis(1))
    }

    pub fn min_evictable_idle(&self) -> Option<Duration> {
        positive_millis(self.min_evictable_idle_millis)
    }

    /// Limits for the backing keyed pool
    pub fn keyed_pool_config(&self) -> KeyedPoolConfig {
        KeyedPoolConfig {
            max_active_per_key: self.max_active_per_node(),
            max_idle_per_key: self.max_idle_per_node(),
            min_idle_per_key: self.min_idle_per_node(),
            max_total: self.max_total(),
            borrow_wait: self.borrow_wait(),
            min_evictable_idle: self.min_evictable_idle(),
        }
    }
}
