//! Node suspension
//!
//! A [`NodeSuspensionStrategy`] is evaluated by the maintenance task for every
//! tracked node on every tick, suspended or not. It alone decides when a node
//! enters and leaves suspension, keeping whatever it needs in the node's
//! [`SuspensionState`] slot.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::node::PooledNode;
use crate::pool::clock::{Clock, TokioClock};

/// Per-node state owned by a suspension strategy
///
/// `is_suspended` must keep returning true until the strategy replaces the
/// state; the pool applies no timeout of its own.
pub trait SuspensionState: Send + Sync + fmt::Debug + Any {
    fn is_suspended(&self) -> bool;

    /// Access to the concrete type, so a strategy can read back its own state
    fn as_any(&self) -> &dyn Any;
}

/// Decides whether a node should be excluded from selection right now
pub trait NodeSuspensionStrategy: Send + Sync + fmt::Debug {
    /// Returns true if the node should be considered suspended
    fn evaluate(&self, node: &PooledNode) -> bool;
}

/// State that is suspended or not until someone replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSuspension(pub bool);

impl SuspensionState for FixedSuspension {
    fn is_suspended(&self) -> bool {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Never suspends anything; the default strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSuspend;

impl NodeSuspensionStrategy for NeverSuspend {
    fn evaluate(&self, _node: &PooledNode) -> bool {
        false
    }
}

/// State kept by [`CorruptionThresholdSuspension`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionSuspensionState {
    /// Set while suspended; the node is released once this has passed
    pub suspended_until: Option<Instant>,

    /// Corrupted-connection counter observed at the previous evaluation
    pub corrupted_seen: u64,
}

impl SuspensionState for CorruptionSuspensionState {
    fn is_suspended(&self) -> bool {
        self.suspended_until.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Suspends nodes that keep handing back corrupted connections
///
/// A node whose corrupted counter grew by at least `threshold` between two
/// evaluations is suspended for `suspend_for`. It is released by the first
/// evaluation after that period has elapsed.
#[derive(Debug, Clone)]
pub struct CorruptionThresholdSuspension {
    threshold: u64,
    suspend_for: Duration,
    clock: Arc<dyn Clock>,
}

impl CorruptionThresholdSuspension {
    /// `threshold` of zero is treated as one
    pub fn new(threshold: u64, suspend_for: Duration) -> Self {
        Self::with_clock(threshold, suspend_for, Arc::new(TokioClock))
    }

    pub fn with_clock(threshold: u64, suspend_for: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: threshold.max(1),
            suspend_for,
            clock,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn suspend_for(&self) -> Duration {
        self.suspend_for
    }
}

impl NodeSuspensionStrategy for CorruptionThresholdSuspension {
    fn evaluate(&self, node: &PooledNode) -> bool {
        let now = self.clock.now();
        let corrupted = node.connections_corrupted();

        let previous = node.with_suspension_state(|state| {
            state
                .and_then(|s| s.as_any().downcast_ref::<CorruptionSuspensionState>())
                .copied()
        });
        let (corrupted_seen, suspended_until) = previous
            .map(|s| (s.corrupted_seen, s.suspended_until))
            .unwrap_or((0, None));

        let suspended_until = match suspended_until {
            Some(until) if now < until => Some(until),
            expired => {
                if expired.is_some() {
                    info!(node = %node.address(), "Suspension period elapsed");
                }
                let new_corruptions = corrupted.saturating_sub(corrupted_seen);
                if new_corruptions >= self.threshold {
                    debug!(
                        node = %node.address(),
                        new_corruptions,
                        threshold = self.threshold,
                        "Corruption threshold reached"
                    );
                    Some(now + self.suspend_for)
                } else {
                    None
                }
            }
        };

        node.set_suspension_state(Some(Box::new(CorruptionSuspensionState {
            suspended_until,
            corrupted_seen: corrupted,
        })));

        suspended_until.is_some()
    }
}
