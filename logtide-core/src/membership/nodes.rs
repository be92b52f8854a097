//! Cluster node roster types
//!
//! The materialized membership state every node agrees on: which node
//! indexes exist, what they are called and where they live, which roles
//! they hold, and their generation. All containers are ordered so that
//! serialization and replay are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable index identifying a node slot in the cluster
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub fn new(i: u32) -> Self {
        NodeIndex(i)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Role a node serves in the cluster
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum NodeRole {
    /// Stores log records
    Storage,

    /// Assigns sequence numbers and drives replication
    Sequencer,
}

/// Per-node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name
    pub name: String,

    /// Address peers reach this node at
    pub address: String,

    /// Roles this node serves
    pub roles: BTreeSet<NodeRole>,

    /// Incarnation counter; bumped each time the node slot is
    /// re-provisioned so stale peers can be told apart
    pub generation: u64,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        NodeConfig {
            name: name.into(),
            address: address.into(),
            roles: BTreeSet::new(),
            generation: 1,
        }
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }
}

/// The full cluster membership roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodesConfiguration {
    nodes: BTreeMap<NodeIndex, NodeConfig>,
}

impl NodesConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: NodeIndex) -> bool {
        self.nodes.contains_key(&index)
    }

    pub fn get(&self, index: NodeIndex) -> Option<&NodeConfig> {
        self.nodes.get(&index)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &NodeConfig)> {
        self.nodes.iter().map(|(idx, cfg)| (*idx, cfg))
    }

    /// Nodes serving a given role, in index order.
    pub fn nodes_with_role(&self, role: NodeRole) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .filter(|(_, cfg)| cfg.has_role(role))
            .map(|(idx, _)| *idx)
            .collect()
    }

    pub(crate) fn insert(&mut self, index: NodeIndex, config: NodeConfig) {
        self.nodes.insert(index, config);
    }

    pub(crate) fn remove(&mut self, index: NodeIndex) -> Option<NodeConfig> {
        self.nodes.remove(&index)
    }

    pub(crate) fn get_mut(&mut self, index: NodeIndex) -> Option<&mut NodeConfig> {
        self.nodes.get_mut(&index)
    }
}
