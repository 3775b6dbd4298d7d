//! Cluster topology
//!
//! The pool never discovers nodes itself. It consumes a [`TopologyProvider`]
//! which is asked to `refresh()` on every maintenance tick and then queried for
//! the `current_nodes()`.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Address identifying a node (e.g. "10.0.0.1" or "cass-1.internal")
pub type NodeAddress = String;

/// Connection parameters shared by every node of a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Port the service listens on
    pub port: u16,

    /// Timeout for establishing a single connection
    pub connect_timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: 9160,
            connect_timeout: Duration::from_secs(4),
        }
    }
}

/// A node of the cluster as reported by the topology provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// Address identity of the node
    pub address: NodeAddress,

    /// Parameters used when connecting to the node
    pub params: ConnectionParams,
}

impl ClusterNode {
    pub fn new(address: impl Into<NodeAddress>, params: ConnectionParams) -> Self {
        Self {
            address: address.into(),
            params,
        }
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.params.port)
    }
}

/// Source of the current cluster membership
#[async_trait]
pub trait TopologyProvider: Send + Sync + fmt::Debug {
    /// Trigger a re-fetch of the membership on the provider side
    async fn refresh(&self) -> Result<()>;

    /// The membership as of the last refresh, in provider order
    fn current_nodes(&self) -> Vec<ClusterNode>;
}

/// Topology backed by an in-memory node list
///
/// The list never changes on `refresh()`; it only changes when
/// [`StaticTopology::set_nodes`] is called. Cloning shares the list.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    nodes: Arc<RwLock<Vec<ClusterNode>>>,
    params: ConnectionParams,
}

impl StaticTopology {
    /// Create a topology from a list of addresses sharing the same parameters
    pub fn new<I, S>(addresses: I, params: ConnectionParams) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddress>,
    {
        let nodes = addresses
            .into_iter()
            .map(|address| ClusterNode::new(address, params.clone()))
            .collect();

        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            params,
        }
    }

    /// Replace the membership; visible to the pool on its next maintenance tick
    pub fn set_nodes<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddress>,
    {
        let nodes = addresses
            .into_iter()
            .map(|address| ClusterNode::new(address, self.params.clone()))
            .collect();
        *self.nodes.write() = nodes;
    }

    /// Connection parameters applied to every node
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

#[async_trait]
impl TopologyProvider for StaticTopology {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn current_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.read().clone()
    }
}
