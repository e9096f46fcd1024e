use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::{
    BalanceMode, DescriptorType, PeerDescriptor, PeerId, RankPriority, TreeShape, TreeView,
};
use crate::error::{IeposError, Result};

/// Parent/children assignment for every peer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Topology {
    root: Option<PeerId>,
    views: BTreeMap<PeerId, TreeView>,
}

impl Topology {
    pub fn root(&self) -> Option<PeerId> {
        self.root
    }

    pub fn view(&self, peer: PeerId) -> Option<&TreeView> {
        self.views.get(&peer)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &TreeView)> {
        self.views.iter()
    }

    /// Number of peers in the subtree rooted at `peer` (including it)
    pub fn subtree_size(&self, peer: PeerId) -> usize {
        let mut size = 0;
        let mut stack = vec![peer];
        while let Some(current) = stack.pop() {
            size += 1;
            if let Some(view) = self.views.get(&current) {
                stack.extend(view.children.iter().copied());
            }
        }
        size
    }

    /// Distance from the root to the deepest peer
    pub fn depth(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut deepest = 0;
        let mut stack = vec![(root, 0)];
        while let Some((peer, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Some(view) = self.views.get(&peer) {
                stack.extend(view.children.iter().map(|c| (*c, depth + 1)));
            }
        }
        deepest
    }

    fn link(&mut self, parent: PeerId, child: PeerId) {
        self.views.entry(parent).or_default().children.push(child);
        self.views.entry(child).or_default().parent = Some(parent);
    }
}

/// Deterministic tree construction over a ranked peer set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyGenerator {
    pub priority: RankPriority,
    pub descriptor: DescriptorType,
    pub shape: TreeShape,
    pub balance: BalanceMode,
    /// Seed of the placement permutation for [`TreeShape::Random`]
    pub seed: u64,
}

impl TopologyGenerator {
    pub fn new(
        priority: RankPriority,
        descriptor: DescriptorType,
        shape: TreeShape,
        balance: BalanceMode,
        seed: u64,
    ) -> Self {
        Self {
            priority,
            descriptor,
            shape,
            balance,
            seed,
        }
    }

    /// Assign a (parent, children) pair to every peer. The first placed peer
    /// becomes the root.
    pub fn generate(&self, peers: &[PeerDescriptor]) -> Result<Topology> {
        if peers.is_empty() {
            return Err(IeposError::Topology("no peers to arrange".into()));
        }
        let mut seen = HashSet::with_capacity(peers.len());
        if let Some(dup) = peers.iter().find(|p| !seen.insert(p.id)) {
            return Err(IeposError::Topology(format!(
                "peer {} registered twice",
                dup.id
            )));
        }

        let placed = self.placement_order(peers);
        let mut topology = Topology {
            root: Some(placed[0].id),
            views: placed
                .iter()
                .map(|p| (p.id, TreeView::default()))
                .collect(),
        };

        match self.balance {
            BalanceMode::List => {
                for pair in placed.windows(2) {
                    topology.link(pair[0].id, pair[1].id);
                }
            }
            BalanceMode::WeightBalanced => {
                attach_balanced(&mut topology, placed[0], &placed[1..]);
            }
        }

        Ok(topology)
    }

    fn placement_order<'a>(&self, peers: &'a [PeerDescriptor]) -> Vec<&'a PeerDescriptor> {
        let key = |p: &PeerDescriptor| match self.descriptor {
            DescriptorType::Rank => p.rank,
            DescriptorType::NodeDegree => p.node_degree as f64,
        };

        let mut ranked: Vec<&PeerDescriptor> = peers.iter().collect();
        // stable: equal keys keep registration order
        ranked.sort_by(|a, b| match self.priority {
            RankPriority::HighRank => key(b).total_cmp(&key(a)),
            RankPriority::LowRank => key(a).total_cmp(&key(b)),
        });

        match self.shape {
            TreeShape::SortedHighToLow => {}
            TreeShape::SortedLowToHigh => ranked.reverse(),
            TreeShape::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                ranked.shuffle(&mut rng);
            }
        }
        ranked
    }
}

/// Split `rest` into at most `node_degree` contiguous groups whose sizes
/// differ by at most one; the head of each group becomes a child of `node`
/// and the group's tail is attached below it.
fn attach_balanced(topology: &mut Topology, node: &PeerDescriptor, rest: &[&PeerDescriptor]) {
    if rest.is_empty() {
        return;
    }
    let groups = node.node_degree.max(1).min(rest.len());
    let base = rest.len() / groups;
    let extra = rest.len() % groups;

    let mut start = 0;
    for g in 0..groups {
        let size = base + usize::from(g < extra);
        let group = &rest[start..start + size];
        topology.link(node.id, group[0].id);
        attach_balanced(topology, group[0], &group[1..]);
        start += size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: usize, degree: usize) -> Vec<PeerDescriptor> {
        (0..n)
            .map(|i| PeerDescriptor::new(PeerId(i), i as f64, degree))
            .collect()
    }

    fn generator(balance: BalanceMode, shape: TreeShape) -> TopologyGenerator {
        TopologyGenerator::new(
            RankPriority::HighRank,
            DescriptorType::Rank,
            shape,
            balance,
            7,
        )
    }

    fn assert_complete_tree(topology: &Topology, n: usize) {
        assert_eq!(topology.len(), n);
        let root = topology.root().unwrap();
        let roots: Vec<_> = topology
            .iter()
            .filter(|(_, v)| v.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(roots, vec![root]);

        // every child points back at its parent
        for (id, view) in topology.iter() {
            for child in &view.children {
                assert_eq!(topology.view(*child).unwrap().parent, Some(*id));
            }
        }

        // reachable from the root without revisiting: no cycles, all peers
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(peer) = stack.pop() {
            assert!(visited.insert(peer), "cycle through {peer}");
            stack.extend(topology.view(peer).unwrap().children.iter().copied());
        }
        assert_eq!(visited.len(), n);
    }

    #[test]
    fn test_topology_completeness() {
        for n in [1, 2, 3, 7, 10, 31, 100] {
            for degree in [1, 2, 3, 5] {
                for shape in [TreeShape::Random, TreeShape::SortedHighToLow, TreeShape::SortedLowToHigh] {
                    for balance in [BalanceMode::WeightBalanced, BalanceMode::List] {
                        let topology = generator(balance, shape).generate(&peers(n, degree)).unwrap();
                        assert_complete_tree(&topology, n);
                    }
                }
            }
        }
    }

    #[test]
    fn test_weight_balanced_siblings() {
        for n in [2, 5, 8, 13, 64, 100] {
            for degree in [2, 3, 4] {
                let topology = generator(BalanceMode::WeightBalanced, TreeShape::SortedHighToLow)
                    .generate(&peers(n, degree))
                    .unwrap();
                for (_, view) in topology.iter() {
                    assert!(view.children.len() <= degree);
                    let sizes: Vec<usize> = view
                        .children
                        .iter()
                        .map(|c| topology.subtree_size(*c))
                        .collect();
                    if let (Some(max), Some(min)) = (sizes.iter().max(), sizes.iter().min()) {
                        assert!(max - min <= 1, "unbalanced siblings {sizes:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_sorted_placement_puts_highest_rank_at_root() {
        let topology = generator(BalanceMode::WeightBalanced, TreeShape::SortedHighToLow)
            .generate(&peers(7, 2))
            .unwrap();
        assert_eq!(topology.root(), Some(PeerId(6)));
        assert_eq!(topology.view(PeerId(6)).unwrap().children, vec![PeerId(5), PeerId(2)]);
        assert_eq!(topology.depth(), 2);

        let reversed = generator(BalanceMode::WeightBalanced, TreeShape::SortedLowToHigh)
            .generate(&peers(7, 2))
            .unwrap();
        assert_eq!(reversed.root(), Some(PeerId(0)));
    }

    #[test]
    fn test_list_is_a_chain() {
        let topology = generator(BalanceMode::List, TreeShape::SortedLowToHigh)
            .generate(&peers(4, 2))
            .unwrap();
        assert_eq!(topology.root(), Some(PeerId(0)));
        assert_eq!(topology.depth(), 3);
        assert_eq!(topology.view(PeerId(2)).unwrap(), &TreeView::new(Some(PeerId(1)), vec![PeerId(3)]));
    }

    #[test]
    fn test_random_shape_is_deterministic_per_seed() {
        let gen = generator(BalanceMode::WeightBalanced, TreeShape::Random);
        assert_eq!(gen.generate(&peers(20, 2)).unwrap(), gen.generate(&peers(20, 2)).unwrap());
    }

    #[test]
    fn test_single_peer_is_root_without_children() {
        let topology = generator(BalanceMode::WeightBalanced, TreeShape::SortedHighToLow)
            .generate(&peers(1, 2))
            .unwrap();
        let view = topology.view(PeerId(0)).unwrap();
        assert!(view.is_disconnected());
        assert_eq!(topology.root(), Some(PeerId(0)));
    }

    #[test]
    fn test_invalid_peer_sets() {
        let gen = TopologyGenerator::default();
        assert!(gen.generate(&[]).is_err());

        let dup = vec![
            PeerDescriptor::new(PeerId(1), 0.0, 2),
            PeerDescriptor::new(PeerId(1), 5.0, 2),
        ];
        assert!(matches!(gen.generate(&dup), Err(IeposError::Topology(_))));
    }
}
