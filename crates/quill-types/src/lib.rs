//! Shared types and identifiers for Quill.
//!
//! This crate defines the data model used across the Quill workspace:
//! tree descriptors ([`Tree`], [`TreeId`], [`TreeType`]), log entries
//! ([`Leaf`]), Merkle tree storage nodes ([`NodeId`], [`Node`]), the signed
//! tree head ([`LogRoot`], [`SignedLogRoot`]), the request-scoped
//! [`RequestContext`] and the [`TimeSource`] abstraction.

use std::fmt;

use serde::{Deserialize, Serialize};

mod context;
mod root;
mod time;

pub use context::{Cancelled, RequestContext};
pub use root::{LOG_ROOT_V1, LogRoot, RootEncodingError, SignedLogRoot};
pub use time::{FakeTimeSource, SystemTimeSource, TimeSource, from_nanos, to_nanos};

/// A 32-byte Merkle hash (SHA-256 output).
pub type Hash = [u8; 32];

/// Maximum depth of a log tree. Node paths are 64-bit.
pub const MAX_TREE_DEPTH: u32 = 64;

// ---------------------------------------------------------------------------
// Tree descriptors
// ---------------------------------------------------------------------------

/// Identifier of a single log tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TreeId(pub i64);

impl TreeId {
    /// Return the raw numeric identifier.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TreeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId({})", self.0)
    }
}

/// Kind of tree. Only [`TreeType::Log`] trees are sequenced here; a
/// pre-ordered log has its leaf indices assigned by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeType {
    /// Append-only log whose leaf order is assigned by the sequencer.
    Log,
    /// Log mirrored from an external source, indices supplied upstream.
    PreorderedLog,
}

/// Descriptor of a tree passed to every sequencing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tree {
    /// Tree identifier.
    pub id: TreeId,
    /// Tree kind.
    pub tree_type: TreeType,
}

impl Tree {
    /// Describe a regular log tree.
    pub fn log(id: impl Into<TreeId>) -> Self {
        Self {
            id: id.into(),
            tree_type: TreeType::Log,
        }
    }
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// One entry submitted to the log.
///
/// A leaf starts out queued (no index, no integrate timestamp). Sequencing
/// assigns `leaf_index` and `integrate_timestamp_nanos` exactly once; after
/// the batch commits they never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    /// RFC 6962 leaf hash of `value`.
    pub merkle_leaf_hash: Hash,
    /// The submitted entry.
    pub value: Vec<u8>,
    /// Opaque data stored alongside the entry but not hashed.
    pub extra_data: Vec<u8>,
    /// Time the leaf became eligible for sequencing (unix nanos).
    pub queue_timestamp_nanos: u64,
    /// Permanent position in the log, set by sequencing.
    pub leaf_index: Option<u64>,
    /// Time the leaf was integrated into the tree (unix nanos).
    pub integrate_timestamp_nanos: Option<u64>,
}

impl Leaf {
    /// Create a queued (unsequenced) leaf.
    pub fn queued(
        merkle_leaf_hash: Hash,
        value: Vec<u8>,
        extra_data: Vec<u8>,
        queue_timestamp_nanos: u64,
    ) -> Self {
        Self {
            merkle_leaf_hash,
            value,
            extra_data,
            queue_timestamp_nanos,
            leaf_index: None,
            integrate_timestamp_nanos: None,
        }
    }

    /// Whether sequencing has assigned this leaf a position.
    pub fn is_sequenced(&self) -> bool {
        self.leaf_index.is_some()
    }
}

// ---------------------------------------------------------------------------
// Merkle storage nodes
// ---------------------------------------------------------------------------

/// Position of a node in the Merkle tree, as a bit path plus its length.
///
/// For a log tree the node at `(level, index)` covers leaves
/// `[index << level, (index + 1) << level)`. Its path is `index << level`
/// as 8 big-endian bytes and `prefix_len_bits = 64 - level`, so a leaf has a
/// 64-bit prefix and the path of every ancestor is a prefix of it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId {
    /// Big-endian bit path.
    pub path: [u8; 8],
    /// Number of significant leading bits in `path`.
    pub prefix_len_bits: u32,
}

impl NodeId {
    /// Node id for the subtree at `level` (0 = leaves) and `index`.
    pub fn from_coords(level: u32, index: u64) -> Self {
        debug_assert!(level < MAX_TREE_DEPTH);
        Self {
            path: (index << level).to_be_bytes(),
            prefix_len_bits: MAX_TREE_DEPTH - level,
        }
    }

    /// Height of the node above the leaves.
    pub fn level(&self) -> u32 {
        MAX_TREE_DEPTH - self.prefix_len_bits
    }

    /// Index of the node within its level.
    pub fn index(&self) -> u64 {
        u64::from_be_bytes(self.path) >> self.level()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.level(), self.index())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeId(path={}, bits={})",
            hex::encode(self.path),
            self.prefix_len_bits
        )
    }
}

/// A stored Merkle tree node. Upserted by `id`; only `hash` and `revision`
/// change when the subtree beneath it grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Position in the tree.
    pub id: NodeId,
    /// Node hash.
    pub hash: Hash,
    /// Tree revision at which the hash was written.
    pub revision: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
