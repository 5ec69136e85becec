//! Batch sequencing and root signing.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use quill_crypto::{RootSigner, SignerError};
use quill_merkle::{HashTreeEngine, PriorTree};
use quill_quota::{QuotaManager, sequencing_specs};
use quill_storage::{LogStorage, LogTreeTx, StorageError};
use quill_types::{
    Cancelled, Hash, LogRoot, RequestContext, SignedLogRoot, TimeSource, Tree, TreeId, TreeType,
    to_nanos,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SequencerError};
use crate::factor::QuotaIncreaseFactor;

/// Integrates queued leaves into a log tree and signs its roots.
///
/// Holds no per-tree state. Calls for distinct trees may run concurrently;
/// exclusivity within one tree is left to the storage layer.
pub struct Sequencer {
    hasher: Arc<dyn HashTreeEngine>,
    time: Arc<dyn TimeSource>,
    storage: Arc<dyn LogStorage>,
    signer: Arc<dyn RootSigner>,
    quota: Arc<dyn QuotaManager>,
    factor: QuotaIncreaseFactor,
}

impl Sequencer {
    pub fn new(
        hasher: Arc<dyn HashTreeEngine>,
        time: Arc<dyn TimeSource>,
        storage: Arc<dyn LogStorage>,
        signer: Arc<dyn RootSigner>,
        quota: Arc<dyn QuotaManager>,
    ) -> Self {
        Self {
            hasher,
            time,
            storage,
            signer,
            quota,
            factor: QuotaIncreaseFactor::default(),
        }
    }

    /// Use a shared quota increase factor instead of the default of 1.
    pub fn with_quota_increase_factor(mut self, factor: QuotaIncreaseFactor) -> Self {
        self.factor = factor;
        self
    }

    /// The factor applied when returning quota tokens.
    pub fn quota_increase_factor(&self) -> &QuotaIncreaseFactor {
        &self.factor
    }

    /// Sequence up to `limit` leaves queued at least `guard_window` ago and
    /// publish a new signed root covering them.
    ///
    /// With nothing to sequence, a new root is signed only if the latest one
    /// is at least `max_root_duration` old (zero disables this). Returns the
    /// number of leaves integrated.
    #[tracing::instrument(skip(self, ctx, tree), fields(tree_id = %tree.id))]
    pub async fn integrate_batch(
        &self,
        ctx: &RequestContext,
        tree: &Tree,
        limit: usize,
        guard_window: Duration,
        max_root_duration: Duration,
    ) -> Result<usize> {
        if tree.tree_type != TreeType::Log {
            return Err(SequencerError::UnsupportedTreeType {
                tree_id: tree.id,
                tree_type: tree.tree_type,
            });
        }

        let mut tx = self.begin(ctx, tree).await?;
        let result = self
            .integrate_in_tx(ctx, tx.as_mut(), limit, guard_window, max_root_duration)
            .await;
        close(tree.id, tx.as_mut()).await;

        let count = result?;
        if count > 0 {
            self.return_tokens(ctx, tree.id, count).await;
        }
        Ok(count)
    }

    /// Publish a new signed root with the current size and hash but a fresh
    /// timestamp and the next revision.
    #[tracing::instrument(skip(self, ctx, tree), fields(tree_id = %tree.id))]
    pub async fn sign_root(&self, ctx: &RequestContext, tree: &Tree) -> Result<()> {
        let mut tx = self.begin(ctx, tree).await?;
        let result = self.sign_root_in_tx(ctx, tx.as_mut()).await;
        close(tree.id, tx.as_mut()).await;
        result
    }

    // -----------------------------------------------------------------------
    // Transaction bodies
    // -----------------------------------------------------------------------

    async fn integrate_in_tx(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn LogTreeTx,
        limit: usize,
        guard_window: Duration,
        max_root_duration: Duration,
    ) -> Result<usize> {
        let now = self.time.now();
        let now_nanos = to_nanos(now);

        let latest = latest_root(ctx, tx).await?;

        let cutoff = now.checked_sub(guard_window).unwrap_or(UNIX_EPOCH);
        let leaves = step(
            ctx,
            tx.dequeue_leaves(ctx, limit, cutoff),
            SequencerError::Dequeue,
        )
        .await?;

        if leaves.is_empty() {
            let age = now_nanos.saturating_sub(latest.timestamp_nanos);
            let stale = !max_root_duration.is_zero() && u128::from(age) >= max_root_duration.as_nanos();
            if !stale {
                step(ctx, tx.commit(ctx), SequencerError::Commit).await?;
                debug!("no leaves to integrate");
                return Ok(0);
            }

            let revision = next_revision(tx, &latest)?;
            let signed = self
                .build_signed_root(ctx, &latest, latest.tree_size, latest.root_hash, revision, now_nanos)
                .await?;
            step(
                ctx,
                tx.store_signed_log_root(ctx, &signed),
                SequencerError::StoreRoot,
            )
            .await?;
            step(ctx, tx.commit(ctx), SequencerError::Commit).await?;
            info!(revision, age_nanos = age, "re-signed stale root");
            return Ok(0);
        }

        let write_revision = next_revision(tx, &latest)?;
        let count = leaves.len();

        let required = self.hasher.required_nodes(latest.tree_size);
        let nodes = if required.is_empty() {
            Vec::new()
        } else {
            step(
                ctx,
                tx.get_merkle_nodes(ctx, &required),
                SequencerError::Sequencing,
            )
            .await?
        };

        let prior = PriorTree {
            size: latest.tree_size,
            root_hash: latest.root_hash,
            nodes,
        };
        let outcome = self
            .hasher
            .append_leaves(prior, leaves, write_revision, now_nanos)?;

        // Gate and sign before any write so a rejected root leaves no trace.
        let signed = self
            .build_signed_root(
                ctx,
                &latest,
                outcome.tree_size,
                outcome.root_hash,
                write_revision,
                now_nanos,
            )
            .await?;

        step(
            ctx,
            tx.update_sequenced_leaves(ctx, &outcome.leaves),
            SequencerError::Sequencing,
        )
        .await?;
        step(
            ctx,
            tx.set_merkle_nodes(ctx, &outcome.nodes),
            SequencerError::Sequencing,
        )
        .await?;
        step(
            ctx,
            tx.store_signed_log_root(ctx, &signed),
            SequencerError::StoreRoot,
        )
        .await?;
        step(ctx, tx.commit(ctx), SequencerError::Commit).await?;

        info!(
            count,
            tree_size = outcome.tree_size,
            revision = write_revision,
            root = %hex::encode(outcome.root_hash),
            "integrated batch"
        );
        Ok(count)
    }

    async fn sign_root_in_tx(&self, ctx: &RequestContext, tx: &mut dyn LogTreeTx) -> Result<()> {
        let now_nanos = to_nanos(self.time.now());
        let latest = latest_root(ctx, tx).await?;
        let revision = next_revision(tx, &latest)?;

        let signed = self
            .build_signed_root(ctx, &latest, latest.tree_size, latest.root_hash, revision, now_nanos)
            .await?;
        step(
            ctx,
            tx.store_signed_log_root(ctx, &signed),
            SequencerError::StoreRoot,
        )
        .await?;
        step(ctx, tx.commit(ctx), SequencerError::Commit).await?;

        info!(revision, tree_size = latest.tree_size, "signed root");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn begin(&self, ctx: &RequestContext, tree: &Tree) -> Result<Box<dyn LogTreeTx>> {
        step(ctx, self.storage.begin(ctx, tree), |source| {
            SequencerError::Begin {
                tree_id: tree.id,
                source,
            }
        })
        .await
    }

    /// Build the candidate root, enforce strictly increasing timestamps and
    /// sign it. Never touches storage.
    async fn build_signed_root(
        &self,
        ctx: &RequestContext,
        latest: &LogRoot,
        tree_size: u64,
        root_hash: Hash,
        revision: u64,
        now_nanos: u64,
    ) -> Result<SignedLogRoot> {
        if now_nanos <= latest.timestamp_nanos {
            return Err(SequencerError::TimestampRegression {
                candidate: now_nanos,
                previous: latest.timestamp_nanos,
            });
        }

        let root = LogRoot {
            tree_size,
            root_hash,
            timestamp_nanos: now_nanos,
            revision,
            metadata: latest.metadata.clone(),
        };
        let message = root.to_canonical_bytes()?;
        let signature = step(
            ctx,
            self.signer.sign(ctx, &message),
            SequencerError::Signing,
        )
        .await?;
        Ok(SignedLogRoot { root, signature })
    }

    /// Return tokens for committed work. Failures are logged, not returned:
    /// the batch is already durable.
    async fn return_tokens(&self, ctx: &RequestContext, tree_id: TreeId, count: usize) {
        let tokens = self.factor.tokens_for(count);
        let specs = sequencing_specs(tree_id);
        match ctx.guard(self.quota.put_tokens(ctx, tokens, &specs)).await {
            Ok(Ok(())) => debug!(tokens, "returned quota tokens"),
            Ok(Err(e)) => warn!(tokens, error = %e, "failed to return quota tokens"),
            Err(Cancelled) => warn!(tokens, "request cancelled before quota tokens were returned"),
        }
    }
}

async fn latest_root(ctx: &RequestContext, tx: &mut dyn LogTreeTx) -> Result<LogRoot> {
    let signed = step(ctx, tx.latest_signed_log_root(ctx), |e| match e {
        StorageError::TreeNeedsInit(tree_id) => SequencerError::TreeNeedsInit { tree_id },
        e => SequencerError::LatestRoot(e),
    })
    .await?;
    Ok(signed.root)
}

fn next_revision(tx: &dyn LogTreeTx, latest: &LogRoot) -> Result<u64> {
    let write_revision = tx.write_revision();
    if latest.revision.checked_add(1) != Some(write_revision) {
        return Err(SequencerError::RevisionMismatch {
            write_revision,
            latest: latest.revision,
        });
    }
    Ok(write_revision)
}

async fn close(tree_id: TreeId, tx: &mut dyn LogTreeTx) {
    if let Err(e) = tx.close().await {
        warn!(%tree_id, error = %e, "failed to close transaction");
    }
}

/// Collaborator errors that can report a cancelled request.
trait Interrupted {
    fn is_cancelled(&self) -> bool;
}

impl Interrupted for StorageError {
    fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled(_))
    }
}

impl Interrupted for SignerError {
    fn is_cancelled(&self) -> bool {
        matches!(self, SignerError::Cancelled(_))
    }
}

/// Run one collaborator call under `ctx`, mapping its error with `wrap`.
async fn step<T, E, F>(
    ctx: &RequestContext,
    fut: F,
    wrap: impl FnOnce(E) -> SequencerError,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Interrupted,
{
    if ctx.is_cancelled() {
        return Err(SequencerError::Cancelled);
    }
    match ctx.guard(fut).await {
        Err(Cancelled) => Err(SequencerError::Cancelled),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_cancelled() => Err(SequencerError::Cancelled),
        Ok(Err(e)) => Err(wrap(e)),
    }
}
