//! Quota token accounting for log trees.
//!
//! Work is charged against [`QuotaSpec`]s: a group (one tree, or the whole
//! service) crossed with a kind (read or write). The sequencer returns
//! tokens through [`QuotaManager::put_tokens`] after every batch it commits,
//! freeing capacity that admission consumed when the leaves were queued.

use std::fmt;

use quill_types::{Cancelled, RequestContext, TreeId};

mod bucket;

pub use bucket::TokenBucketQuotaManager;

/// Errors from quota operations.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Not enough tokens are available for the request.
    #[error("quota exhausted for {spec}: requested {requested}, available {available}")]
    Exhausted {
        /// The first spec that could not satisfy the request.
        spec: QuotaSpec,
        /// Tokens requested.
        requested: u64,
        /// Tokens available at the time of the request.
        available: u64,
    },

    /// The quota backend could not be reached.
    #[error("quota backend unavailable: {0}")]
    Unavailable(String),

    /// The request was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type Result<T> = std::result::Result<T, QuotaError>;

/// Scope a quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaGroup {
    /// Quota of a single tree.
    Tree(TreeId),
    /// Service-wide quota.
    Global,
}

/// Kind of work a quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaKind {
    Read,
    Write,
}

/// One quota bucket: a group and a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaSpec {
    pub group: QuotaGroup,
    pub kind: QuotaKind,
}

impl QuotaSpec {
    pub fn new(group: QuotaGroup, kind: QuotaKind) -> Self {
        Self { group, kind }
    }
}

impl fmt::Display for QuotaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            QuotaKind::Read => "read",
            QuotaKind::Write => "write",
        };
        match self.group {
            QuotaGroup::Tree(id) => write!(f, "trees/{id}/{kind}"),
            QuotaGroup::Global => write!(f, "global/{kind}"),
        }
    }
}

/// The four specs charged for sequencing work on `tree_id`, in order:
/// tree read, tree write, global read, global write.
pub fn sequencing_specs(tree_id: TreeId) -> [QuotaSpec; 4] {
    [
        QuotaSpec::new(QuotaGroup::Tree(tree_id), QuotaKind::Read),
        QuotaSpec::new(QuotaGroup::Tree(tree_id), QuotaKind::Write),
        QuotaSpec::new(QuotaGroup::Global, QuotaKind::Read),
        QuotaSpec::new(QuotaGroup::Global, QuotaKind::Write),
    ]
}

/// Acquires and returns quota tokens.
#[async_trait::async_trait]
pub trait QuotaManager: Send + Sync {
    /// Take `tokens` from every spec, or from none if any is short.
    async fn get_tokens(&self, ctx: &RequestContext, tokens: u64, specs: &[QuotaSpec]) -> Result<()>;

    /// Return `tokens` to every spec.
    async fn put_tokens(&self, ctx: &RequestContext, tokens: u64, specs: &[QuotaSpec]) -> Result<()>;

    /// Restore every spec to full capacity.
    async fn reset_quota(&self, ctx: &RequestContext, specs: &[QuotaSpec]) -> Result<()>;
}

/// [`QuotaManager`] that grants everything and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQuotaManager;

#[async_trait::async_trait]
impl QuotaManager for NoopQuotaManager {
    async fn get_tokens(&self, _ctx: &RequestContext, _tokens: u64, _specs: &[QuotaSpec]) -> Result<()> {
        Ok(())
    }

    async fn put_tokens(&self, _ctx: &RequestContext, _tokens: u64, _specs: &[QuotaSpec]) -> Result<()> {
        Ok(())
    }

    async fn reset_quota(&self, _ctx: &RequestContext, _specs: &[QuotaSpec]) -> Result<()> {
        Ok(())
    }
}
