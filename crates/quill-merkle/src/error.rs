//! Error types for Merkle tree computation.

use quill_types::{Hash, NodeId};

/// Errors from the hash tree engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// A node the compact range needs was not supplied by storage.
    #[error("missing merkle node {0}")]
    MissingNode(NodeId),

    /// The node set does not match the expected compact range shape.
    #[error("compact range for size {size} needs {expected} hashes, got {actual}")]
    BadRangeShape {
        size: u64,
        expected: usize,
        actual: usize,
    },

    /// Hashes rebuilt from stored nodes do not reproduce the stored root.
    #[error("stored nodes rebuild root {computed} but latest root is {stored} at size {size}")]
    RootMismatch {
        size: u64,
        stored: String,
        computed: String,
    },

    /// Appending would overflow the 64-bit leaf index space.
    #[error("tree size overflow appending {count} leaves at size {size}")]
    SizeOverflow { size: u64, count: usize },
}

impl MerkleError {
    pub(crate) fn root_mismatch(size: u64, stored: &Hash, computed: &Hash) -> Self {
        Self::RootMismatch {
            size,
            stored: hex::encode(stored),
            computed: hex::encode(computed),
        }
    }
}

pub type Result<T> = std::result::Result<T, MerkleError>;
