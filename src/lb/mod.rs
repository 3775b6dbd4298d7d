//! Node health and load balancing policy
//!
//! This module holds the per-node health record and the two pluggable
//! policies the pool consults.
//!
//! # Components
//!
//! - [`PooledNode`]: One tracked node with suspension state and connection counters
//! - [`NodeSelectionStrategy`]: Chooses the node to borrow from
//! - [`NodeSuspensionStrategy`]: Decides which nodes are temporarily excluded
//!
//! # Selection Algorithms
//!
//! - **Least-loaded** (default): The eligible node with the fewest active connections
//! - **Round-robin**: Sequential rotation over eligible nodes
//! - **Power-of-two**: Pick 2 random eligible nodes, choose the less loaded one
//!
//! # Suspension
//!
//! - **Never** (default): No node is ever suspended
//! - **Corruption threshold**: Suspend a node for a fixed period once it hands
//!   back too many corrupted connections between two maintenance ticks
//!
//! # Thread Safety
//!
//! Node counters are atomics and the suspension slot sits behind a
//! `parking_lot::RwLock`, so records are shared as `Arc<PooledNode>` between the
//! maintenance task and every caller of `acquire`.

pub mod node;
pub mod selection;
pub mod suspension;

pub use node::{NodeGauge, NodeSnapshot, PooledNode};
pub use selection::{
    LeastLoadedSelection, NodeSelectionStrategy, PowerOfTwoSelection, RoundRobinSelection,
    SelectionAlgorithm,
};
pub use suspension::{
    CorruptionSuspensionState, CorruptionThresholdSuspension, FixedSuspension, NeverSuspend,
    NodeSuspensionStrategy, SuspensionState,
};
