//! Error types for log storage operations.

use quill_types::{Cancelled, TreeId};

/// Errors that can occur during log storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No tree with this id exists in storage.
    #[error("tree not found: {0}")]
    TreeNotFound(TreeId),

    /// A tree with this id already exists.
    #[error("tree already exists: {0}")]
    TreeExists(TreeId),

    /// The tree exists but has no signed root yet.
    ///
    /// Callers branch on this to run tree initialisation instead of
    /// retrying integration.
    #[error("tree {0} needs initialising")]
    TreeNeedsInit(TreeId),

    /// A bootstrap root was installed on a tree that already has one.
    #[error("tree {0} is already initialised")]
    AlreadyInitialised(TreeId),

    /// Another transaction committed to the tree after this one began.
    #[error("tree {tree_id}: commit at revision {write_revision} conflicts with stored revision {stored}")]
    RevisionConflict {
        /// Tree the commit targeted.
        tree_id: TreeId,
        /// Revision this transaction was writing.
        write_revision: u64,
        /// Latest revision found in storage at commit time.
        stored: u64,
    },

    /// A staged root does not carry the transaction's write revision.
    #[error("root revision {root} does not match write revision {write_revision}")]
    RootRevisionMismatch {
        /// Revision on the staged root.
        root: u64,
        /// The transaction's write revision.
        write_revision: u64,
    },

    /// A leaf index is already taken.
    #[error("tree {tree_id}: leaf index {index} already sequenced")]
    LeafIndexConflict {
        /// Tree being written.
        tree_id: TreeId,
        /// The duplicate index.
        index: u64,
    },

    /// A leaf handed to `update_sequenced_leaves` has no index or timestamp.
    #[error("leaf {0} is missing sequencing metadata")]
    UnsequencedLeaf(String),

    /// The transaction was already committed or closed.
    #[error("transaction already finished")]
    TxFinished,

    /// The underlying backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The request was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

impl StorageError {
    /// Whether this is the "tree not initialised" sentinel.
    pub fn is_tree_needs_init(&self) -> bool {
        matches!(self, Self::TreeNeedsInit(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
