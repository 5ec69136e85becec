//! Hash tree engine used by the sequencer to extend a log tree.

use std::collections::BTreeMap;

use quill_types::{Hash, Leaf, Node, NodeId};
use tracing::{debug, trace};

use crate::compact::{CompactRange, node_coords};
use crate::error::{MerkleError, Result};
use crate::rfc6962;

/// State of the tree before a batch is appended.
#[derive(Debug, Clone)]
pub struct PriorTree {
    /// Size from the latest signed root.
    pub size: u64,
    /// Root hash from the latest signed root.
    pub root_hash: Hash,
    /// Stored nodes, at least those listed by
    /// [`HashTreeEngine::required_nodes`] for `size`.
    pub nodes: Vec<Node>,
}

/// Result of appending a batch.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// The input leaves with `leaf_index` and `integrate_timestamp_nanos` set.
    pub leaves: Vec<Leaf>,
    /// Every node whose hash was created or changed, at the write revision.
    pub nodes: Vec<Node>,
    /// Root hash over the extended tree.
    pub root_hash: Hash,
    /// New tree size.
    pub tree_size: u64,
}

/// Computes leaf hashes and extends a tree with a batch of leaves.
pub trait HashTreeEngine: Send + Sync {
    /// Merkle leaf hash of an entry.
    fn hash_leaf(&self, value: &[u8]) -> Hash;

    /// Stored nodes needed to resume appending at `tree_size`.
    fn required_nodes(&self, tree_size: u64) -> Vec<NodeId>;

    /// Assign indices `prior.size..` to `leaves` in order, stamp them with
    /// `now_nanos`, and compute the nodes and root of the extended tree.
    fn append_leaves(
        &self,
        prior: PriorTree,
        leaves: Vec<Leaf>,
        write_revision: u64,
        now_nanos: u64,
    ) -> Result<AppendOutcome>;
}

/// RFC 6962 engine backed by a [`CompactRange`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactTreeEngine;

impl CompactTreeEngine {
    pub fn new() -> Self {
        Self
    }

    fn load_range(&self, prior: &PriorTree) -> Result<CompactRange> {
        if prior.size == 0 {
            let empty = rfc6962::empty_root();
            if prior.root_hash != empty {
                return Err(MerkleError::root_mismatch(0, &prior.root_hash, &empty));
            }
            return Ok(CompactRange::new());
        }

        // A perfect tree is its own single subtree.
        if prior.size.is_power_of_two() {
            return CompactRange::from_hashes(prior.size, vec![prior.root_hash]);
        }

        let by_id: BTreeMap<NodeId, Hash> = prior.nodes.iter().map(|n| (n.id, n.hash)).collect();
        let hashes = node_coords(prior.size)
            .into_iter()
            .map(|(level, index)| {
                let id = NodeId::from_coords(level, index);
                by_id.get(&id).copied().ok_or(MerkleError::MissingNode(id))
            })
            .collect::<Result<Vec<_>>>()?;

        let range = CompactRange::from_hashes(prior.size, hashes)?;
        let rebuilt = range.root(|_, _, _| {});
        if rebuilt != prior.root_hash {
            return Err(MerkleError::root_mismatch(
                prior.size,
                &prior.root_hash,
                &rebuilt,
            ));
        }
        Ok(range)
    }
}

impl HashTreeEngine for CompactTreeEngine {
    fn hash_leaf(&self, value: &[u8]) -> Hash {
        rfc6962::hash_leaf(value)
    }

    fn required_nodes(&self, tree_size: u64) -> Vec<NodeId> {
        if tree_size == 0 || tree_size.is_power_of_two() {
            return Vec::new();
        }
        node_coords(tree_size)
            .into_iter()
            .map(|(level, index)| NodeId::from_coords(level, index))
            .collect()
    }

    fn append_leaves(
        &self,
        prior: PriorTree,
        mut leaves: Vec<Leaf>,
        write_revision: u64,
        now_nanos: u64,
    ) -> Result<AppendOutcome> {
        let overflow = || MerkleError::SizeOverflow {
            size: prior.size,
            count: leaves.len(),
        };
        let new_size = u64::try_from(leaves.len())
            .ok()
            .and_then(|n| prior.size.checked_add(n))
            .ok_or_else(overflow)?;

        let mut range = self.load_range(&prior)?;
        let mut touched: BTreeMap<NodeId, Hash> = BTreeMap::new();
        let mut record = |level: u32, index: u64, hash: &Hash| {
            touched.insert(NodeId::from_coords(level, index), *hash);
        };

        for leaf in &mut leaves {
            let index = range.size();
            leaf.leaf_index = Some(index);
            leaf.integrate_timestamp_nanos = Some(now_nanos);
            range.append(leaf.merkle_leaf_hash, &mut record)?;
            trace!(index, "appended leaf");
        }
        let root_hash = range.root(&mut record);

        let nodes: Vec<Node> = touched
            .into_iter()
            .map(|(id, hash)| Node {
                id,
                hash,
                revision: write_revision,
            })
            .collect();

        debug!(
            prior_size = prior.size,
            new_size,
            nodes = nodes.len(),
            revision = write_revision,
            "extended tree"
        );

        Ok(AppendOutcome {
            leaves,
            nodes,
            root_hash,
            tree_size: new_size,
        })
    }
}
