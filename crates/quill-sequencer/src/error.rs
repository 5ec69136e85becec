//! Error types for sequencing operations.

use quill_crypto::SignerError;
use quill_merkle::MerkleError;
use quill_storage::StorageError;
use quill_types::{RootEncodingError, TreeId, TreeType};

/// Errors returned by [`Sequencer`](crate::Sequencer) operations.
///
/// Each variant names the step that failed. Nothing is retried internally
/// and nothing is committed when an error is returned.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// The storage transaction could not be opened.
    #[error("failed to begin transaction for tree {tree_id}: {source}")]
    Begin {
        tree_id: TreeId,
        #[source]
        source: StorageError,
    },

    /// Pending leaves could not be dequeued.
    #[error("failed to dequeue leaves: {0}")]
    Dequeue(#[source] StorageError),

    /// The latest signed root could not be read.
    #[error("failed to get latest root: {0}")]
    LatestRoot(#[source] StorageError),

    /// The tree has no signed root yet and must be initialised first.
    #[error("tree {tree_id} needs initialising")]
    TreeNeedsInit { tree_id: TreeId },

    /// Sequenced leaves or Merkle nodes could not be read or written.
    #[error("failed to update sequenced leaves or merkle nodes: {0}")]
    Sequencing(#[source] StorageError),

    /// The new root would not be strictly newer than the latest one.
    #[error(
        "refusing to sign root with timestamp earlier than previous root ({candidate} <= {previous})"
    )]
    TimestampRegression { candidate: u64, previous: u64 },

    /// The candidate root has no canonical encoding.
    #[error("failed to encode root: {0}")]
    RootEncoding(#[from] RootEncodingError),

    /// The signer failed.
    #[error("failed to sign root: {0}")]
    Signing(#[source] SignerError),

    /// The signed root could not be stored.
    #[error("failed to store signed root: {0}")]
    StoreRoot(#[source] StorageError),

    /// The transaction could not be committed.
    #[error("failed to commit: {0}")]
    Commit(#[source] StorageError),

    /// The transaction's write revision does not follow the latest root.
    #[error("write revision {write_revision} does not follow latest root revision {latest}")]
    RevisionMismatch { write_revision: u64, latest: u64 },

    /// Stored nodes are missing or do not reproduce the latest root hash.
    #[error("corrupt tree state: {0}")]
    CorruptTreeState(#[source] MerkleError),

    /// Any other failure extending the Merkle tree.
    #[error("merkle tree update failed: {0}")]
    Merkle(#[source] MerkleError),

    /// Only plain log trees are sequenced.
    #[error("tree {tree_id} has unsupported type {tree_type:?}")]
    UnsupportedTreeType { tree_id: TreeId, tree_type: TreeType },

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
}

impl SequencerError {
    /// Whether re-running the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimestampRegression { .. } | Self::Commit(_))
    }

    /// Whether the caller should initialise the tree instead of retrying.
    pub fn needs_init(&self) -> bool {
        matches!(self, Self::TreeNeedsInit { .. })
    }
}

impl From<MerkleError> for SequencerError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::MissingNode(_)
            | MerkleError::BadRangeShape { .. }
            | MerkleError::RootMismatch { .. } => Self::CorruptTreeState(err),
            MerkleError::SizeOverflow { .. } => Self::Merkle(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;
