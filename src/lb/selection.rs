use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::node::PooledNode;

/// Picks the node a connection should be borrowed from
///
/// Implementations are pure policy: they read node metrics but never mutate
/// node state. Suspended nodes and the excluded hint are never eligible.
pub trait NodeSelectionStrategy: Send + Sync + fmt::Debug {
    /// Returns the chosen node, or `None` when no candidate is eligible
    fn select(
        &self,
        candidates: &[Arc<PooledNode>],
        exclude_hint: Option<&str>,
    ) -> Option<Arc<PooledNode>>;
}

/// Candidates that are neither suspended nor the excluded hint
fn eligible<'a>(
    candidates: &'a [Arc<PooledNode>],
    exclude_hint: Option<&'a str>,
) -> impl Iterator<Item = &'a Arc<PooledNode>> + 'a {
    candidates
        .iter()
        .filter(move |node| exclude_hint != Some(node.address()))
        .filter(|node| !node.is_suspended())
}

/// Chooses the eligible node with the fewest active connections
///
/// Ties go to whichever tied node comes first in the candidate order, which
/// follows the registry's unordered iteration; callers must not rely on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedSelection;

impl NodeSelectionStrategy for LeastLoadedSelection {
    fn select(
        &self,
        candidates: &[Arc<PooledNode>],
        exclude_hint: Option<&str>,
    ) -> Option<Arc<PooledNode>> {
        eligible(candidates, exclude_hint)
            .min_by_key(|node| node.num_active())
            .cloned()
    }
}

/// Rotates through eligible nodes
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    counter: AtomicUsize,
}

impl RoundRobinSelection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeSelectionStrategy for RoundRobinSelection {
    fn select(
        &self,
        candidates: &[Arc<PooledNode>],
        exclude_hint: Option<&str>,
    ) -> Option<Arc<PooledNode>> {
        let eligible: Vec<_> = eligible(candidates, exclude_hint).collect();
        if eligible.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Some(Arc::clone(eligible[index]))
    }
}

/// Picks two random eligible nodes and keeps the less loaded one
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerOfTwoSelection;

impl NodeSelectionStrategy for PowerOfTwoSelection {
    fn select(
        &self,
        candidates: &[Arc<PooledNode>],
        exclude_hint: Option<&str>,
    ) -> Option<Arc<PooledNode>> {
        let eligible: Vec<_> = eligible(candidates, exclude_hint).collect();
        match eligible.len() {
            0 => None,
            1 => Some(Arc::clone(eligible[0])),
            len => {
                let mut rng = rand::thread_rng();
                let a = eligible[rng.gen_range(0..len)];
                let b = eligible[rng.gen_range(0..len)];

                if a.num_active() <= b.num_active() {
                    Some(Arc::clone(a))
                } else {
                    Some(Arc::clone(b))
                }
            }
        }
    }
}

/// Built-in selection strategies, as named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionAlgorithm {
    #[default]
    LeastLoaded,
    RoundRobin,
    PowerOfTwo,
}

impl SelectionAlgorithm {
    /// Instantiate the strategy
    pub fn build(self) -> Arc<dyn NodeSelectionStrategy> {
        match self {
            SelectionAlgorithm::LeastLoaded => Arc::new(LeastLoadedSelection),
            SelectionAlgorithm::RoundRobin => Arc::new(RoundRobinSelection::new()),
            SelectionAlgorithm::PowerOfTwo => Arc::new(PowerOfTwoSelection),
        }
    }
}

impl FromStr for SelectionAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least_loaded" => Ok(SelectionAlgorithm::LeastLoaded),
            "round_robin" => Ok(SelectionAlgorithm::RoundRobin),
            "power_of_two" => Ok(SelectionAlgorithm::PowerOfTwo),
            other => anyhow::bail!("Unknown selection strategy '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::node::NodeGauge;
    use crate::lb::suspension::FixedSuspension;
    use proptest::prelude::*;

    fn create_node(address: &str, active: usize, suspended: bool) -> Arc<PooledNode> {
        let gauge = Arc::new(NodeGauge::new());
        gauge.set_active(active);
        let node = PooledNode::new(address, gauge);
        node.set_suspension_state(Some(Box::new(FixedSuspension(suspended))));
        Arc::new(node)
    }

    fn suspend(node: &PooledNode) {
        node.set_suspension_state(Some(Box::new(FixedSuspension(true))));
    }

    #[test]
    fn test_least_loaded_scenario() {
        let nodes = vec![
            create_node("A", 2, false),
            create_node("B", 0, false),
            create_node("C", 5, false),
        ];
        let strategy = LeastLoadedSelection;

        let selected = strategy.select(&nodes, None).unwrap();
        assert_eq!(selected.address(), "B");

        suspend(&nodes[1]);
        let selected = strategy.select(&nodes, None).unwrap();
        assert_eq!(selected.address(), "A");

        let selected = strategy.select(&nodes, Some("A")).unwrap();
        assert_eq!(selected.address(), "C");
    }

    #[test]
    fn test_all_nodes_suspended() {
        let nodes = vec![
            create_node("node1", 0, true),
            create_node("node2", 0, true),
            create_node("node3", 0, true),
        ];

        assert!(LeastLoadedSelection.select(&nodes, None).is_none());
        assert!(RoundRobinSelection::new().select(&nodes, None).is_none());
        assert!(PowerOfTwoSelection.select(&nodes, None).is_none());
    }

    #[test]
    fn test_only_one_candidate_node() {
        let nodes = vec![
            create_node("node1", 0, true),
            create_node("node2", 0, true),
            create_node("node3", 0, true),
            create_node("node4", 100, false),
        ];

        let selected = LeastLoadedSelection.select(&nodes, None).unwrap();
        assert_eq!(selected.address(), "node4");
    }

    #[test]
    fn test_hint_excluded_even_when_least_loaded() {
        let nodes = vec![create_node("node1", 0, false), create_node("node2", 9, false)];

        let selected = LeastLoadedSelection.select(&nodes, Some("node1")).unwrap();
        assert_eq!(selected.address(), "node2");
    }

    #[test]
    fn test_only_candidate_is_hint() {
        let nodes = vec![create_node("node1", 0, false)];
        assert!(LeastLoadedSelection.select(&nodes, Some("node1")).is_none());
    }

    #[test]
    fn test_unevaluated_node_is_eligible() {
        let node = Arc::new(PooledNode::new("fresh", Arc::new(NodeGauge::new())));
        let selected = LeastLoadedSelection.select(&[node], None).unwrap();
        assert_eq!(selected.address(), "fresh");
    }

    #[test]
    fn test_empty_candidates() {
        assert!(LeastLoadedSelection.select(&[], None).is_none());
        assert!(RoundRobinSelection::new().select(&[], None).is_none());
        assert!(PowerOfTwoSelection.select(&[], None).is_none());
    }

    #[test]
    fn test_selection_does_not_mutate_nodes() {
        let nodes = vec![create_node("node1", 3, false), create_node("node2", 1, true)];

        LeastLoadedSelection.select(&nodes, None);

        assert_eq!(nodes[0].num_active(), 3);
        assert_eq!(nodes[0].connections_borrowed_total(), 0);
        assert!(nodes[1].is_suspended());
    }

    #[test]
    fn test_round_robin_skips_ineligible() {
        let nodes = vec![
            create_node("node1", 0, false),
            create_node("node2", 0, true),
            create_node("node3", 0, false),
        ];
        let strategy = RoundRobinSelection::new();

        let picks: Vec<_> = (0..4)
            .map(|_| strategy.select(&nodes, None).unwrap().address().to_string())
            .collect();
        assert_eq!(picks, vec!["node1", "node3", "node1", "node3"]);
    }

    #[test]
    fn test_power_of_two_returns_eligible() {
        let nodes: Vec<_> = (0..10)
            .map(|i| create_node(&format!("node{}", i), i, i % 3 == 0))
            .collect();

        for _ in 0..100 {
            let selected = PowerOfTwoSelection.select(&nodes, Some("node1")).unwrap();
            assert!(!selected.is_suspended());
            assert_ne!(selected.address(), "node1");
        }
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "least_loaded".parse::<SelectionAlgorithm>().unwrap(),
            SelectionAlgorithm::LeastLoaded
        );
        assert_eq!(
            "round_robin".parse::<SelectionAlgorithm>().unwrap(),
            SelectionAlgorithm::RoundRobin
        );
        assert!("random".parse::<SelectionAlgorithm>().is_err());
    }

    proptest! {
        #[test]
        fn prop_least_loaded_picks_minimum_eligible(
            loads in prop::collection::vec((0usize..50, any::<bool>()), 1..12),
            hint in prop::option::of(0usize..12),
        ) {
            let nodes: Vec<_> = loads
                .iter()
                .enumerate()
                .map(|(i, (active, suspended))| create_node(&format!("n{}", i), *active, *suspended))
                .collect();
            let hint_address = hint.map(|i| format!("n{}", i));

            let eligible_min = nodes
                .iter()
                .filter(|n| !n.is_suspended())
                .filter(|n| hint_address.as_deref() != Some(n.address()))
                .map(|n| n.num_active())
                .min();

            let selected = LeastLoadedSelection.select(&nodes, hint_address.as_deref());

            match eligible_min {
                None => prop_assert!(selected.is_none()),
                Some(min) => {
                    let selected = selected.unwrap();
                    prop_assert!(!selected.is_suspended());
                    prop_assert_ne!(Some(selected.address()), hint_address.as_deref());
                    prop_assert_eq!(selected.num_active(), min);
                }
            }
        }
    }
}
