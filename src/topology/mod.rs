//! Tree topology: peer identities, per-peer views, the pure tree generator,
//! the central broker that hands out views and the per-peer client that
//! requests them.

mod broker;
mod client;
mod generator;

pub use broker::{BrokerState, TopologyBroker};
pub use client::{ClientState, TopologyClient};
pub use generator::{Topology, TopologyGenerator};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a peer (its endpoint on the transport)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub usize);

impl PeerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Endpoint a message can be sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Broker,
    Peer(PeerId),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Broker => write!(f, "broker"),
            Address::Peer(id) => write!(f, "{}", id),
        }
    }
}

impl From<PeerId> for Address {
    fn from(id: PeerId) -> Self {
        Address::Peer(id)
    }
}

/// What a peer tells the broker about itself. Two descriptors are equal
/// when they name the same peer, whatever their rank or degree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub rank: f64,
    /// Maximum number of children
    pub node_degree: usize,
}

impl PeerDescriptor {
    pub fn new(id: PeerId, rank: f64, node_degree: usize) -> Self {
        Self {
            id,
            rank,
            node_degree,
        }
    }
}

impl PartialEq for PeerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerDescriptor {}

impl Hash for PeerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Position of one peer in the tree
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeView {
    pub parent: Option<PeerId>,
    pub children: Vec<PeerId>,
}

impl TreeView {
    pub fn new(parent: Option<PeerId>, children: Vec<PeerId>) -> Self {
        Self { parent, children }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && !self.children.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Neither parent nor children
    pub fn is_disconnected(&self) -> bool {
        self.parent.is_none() && self.children.is_empty()
    }
}

/// Sort direction of the ranking descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankPriority {
    /// Highest descriptor value first
    #[default]
    HighRank,
    LowRank,
}

/// Which descriptor field ranks the peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorType {
    #[default]
    Rank,
    NodeDegree,
}

/// Placement order of the ranked peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TreeShape {
    Random,
    #[default]
    SortedHighToLow,
    SortedLowToHigh,
}

/// How placed peers are wired into a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// k-ary tree whose sibling subtrees differ in size by at most one
    #[default]
    WeightBalanced,
    /// Single chain
    List,
}

impl fmt::Display for BalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceMode::WeightBalanced => write!(f, "weight_balanced"),
            BalanceMode::List => write!(f, "list"),
        }
    }
}

impl fmt::Display for TreeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeShape::Random => write!(f, "random"),
            TreeShape::SortedHighToLow => write!(f, "sorted_high_to_low"),
            TreeShape::SortedLowToHigh => write!(f, "sorted_low_to_high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_equality_is_by_identity() {
        let a = PeerDescriptor::new(PeerId(3), 1.0, 2);
        let b = PeerDescriptor::new(PeerId(3), 9.0, 5);
        let c = PeerDescriptor::new(PeerId(4), 1.0, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<PeerDescriptor> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_view_roles() {
        let root = TreeView::new(None, vec![PeerId(1)]);
        let leaf = TreeView::new(Some(PeerId(0)), vec![]);
        let alone = TreeView::default();
        assert!(root.is_root());
        assert!(leaf.is_leaf() && !leaf.is_root());
        assert!(alone.is_disconnected() && !alone.is_root());
    }
}
