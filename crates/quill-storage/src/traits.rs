//! Storage traits for log trees.

use std::time::SystemTime;

use quill_types::{Leaf, Node, NodeId, RequestContext, SignedLogRoot, Tree};

use crate::error::Result;

/// Opens transactions against log trees.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait LogStorage: Send + Sync {
    /// Begin a transaction scoped to one tree.
    async fn begin(&self, ctx: &RequestContext, tree: &Tree) -> Result<Box<dyn LogTreeTx>>;
}

/// A transaction over one log tree.
///
/// [`latest_signed_log_root`](LogTreeTx::latest_signed_log_root) returns
/// the root that was latest when the transaction began. Queue and node reads
/// see the currently committed state; if another transaction has stored a
/// root since this one began, [`commit`](LogTreeTx::commit) fails with a
/// revision conflict. Writes are staged and become visible atomically on
/// commit.
/// [`close`](LogTreeTx::close) without a prior commit discards them, and any
/// leaves dequeued in the transaction stay queued.
#[async_trait::async_trait]
pub trait LogTreeTx: Send {
    /// Revision that roots and nodes written by this transaction carry.
    fn write_revision(&self) -> u64;

    /// Latest committed signed root.
    ///
    /// Returns [`StorageError::TreeNeedsInit`](crate::StorageError::TreeNeedsInit)
    /// when the tree has no root yet.
    async fn latest_signed_log_root(&mut self, ctx: &RequestContext) -> Result<SignedLogRoot>;

    /// Up to `limit` queued leaves whose queue timestamp is at or before
    /// `cutoff`, oldest first.
    async fn dequeue_leaves(
        &mut self,
        ctx: &RequestContext,
        limit: usize,
        cutoff: SystemTime,
    ) -> Result<Vec<Leaf>>;

    /// Stored nodes for `ids`. Ids with no stored node are omitted.
    async fn get_merkle_nodes(&mut self, ctx: &RequestContext, ids: &[NodeId]) -> Result<Vec<Node>>;

    /// Stage sequencing metadata for dequeued leaves.
    async fn update_sequenced_leaves(&mut self, ctx: &RequestContext, leaves: &[Leaf]) -> Result<()>;

    /// Stage node upserts.
    async fn set_merkle_nodes(&mut self, ctx: &RequestContext, nodes: &[Node]) -> Result<()>;

    /// Stage a new signed root.
    async fn store_signed_log_root(&mut self, ctx: &RequestContext, root: &SignedLogRoot) -> Result<()>;

    /// Atomically apply all staged writes.
    async fn commit(&mut self, ctx: &RequestContext) -> Result<()>;

    /// Release the transaction. A no-op after a successful commit,
    /// otherwise a rollback.
    async fn close(&mut self) -> Result<()>;
}
