//! Shared harness for Quill integration tests.
//!
//! Provides [`LogHarness`]: a sequencer wired to in-memory storage, an
//! ed25519 signer, a token bucket quota manager and a manually advanced
//! clock. [`LogHarness::verify_log`] checks every committed root of a tree
//! against the sequenced leaves.

use std::sync::Arc;
use std::time::Duration;

use quill_crypto::{Ed25519RootSigner, RootSigner, verify_signed_log_root};
use quill_merkle::rfc6962;
use quill_quota::TokenBucketQuotaManager;
use quill_sequencer::{QuotaIncreaseFactor, Sequencer};
use quill_storage::{LogStorage, MemoryLogStorage, SlowLogStorage};
use quill_types::{
    FakeTimeSource, Leaf, LogRoot, RequestContext, SignedLogRoot, TimeSource, Tree, TreeId,
    to_nanos,
};

/// 2016-05-25T10:55:05Z.
pub const START_NANOS: u64 = 1_464_173_705_000_000_000;

/// Clock step between sequencer calls.
pub const TICK: Duration = Duration::from_millis(1);

const SIGNING_SEED: [u8; 32] = [7u8; 32];

pub struct LogHarness {
    /// Backing store, for seeding and inspection.
    pub storage: Arc<MemoryLogStorage>,
    pub clock: Arc<FakeTimeSource>,
    pub signer: Arc<Ed25519RootSigner>,
    pub quota: Arc<TokenBucketQuotaManager>,
    pub factor: QuotaIncreaseFactor,
    pub sequencer: Arc<Sequencer>,
}

impl LogHarness {
    /// Harness with unlimited quota.
    pub fn new() -> Self {
        Self::with_quota(TokenBucketQuotaManager::new())
    }

    pub fn with_quota(quota: TokenBucketQuotaManager) -> Self {
        let storage = Arc::new(MemoryLogStorage::new());
        Self::build(storage.clone(), storage, quota)
    }

    /// Harness whose sequencer reaches storage through a [`SlowLogStorage`]
    /// with up to `max_ms` of latency per call.
    pub fn with_slow_storage(max_ms: u64, seed: u64) -> Self {
        let storage = Arc::new(MemoryLogStorage::new());
        let slow = SlowLogStorage::new(storage.clone())
            .read_latency(0, max_ms)
            .write_latency(0, max_ms)
            .seed(seed);
        Self::build(storage, Arc::new(slow), TokenBucketQuotaManager::new())
    }

    fn build(
        storage: Arc<MemoryLogStorage>,
        backend: Arc<dyn LogStorage>,
        quota: TokenBucketQuotaManager,
    ) -> Self {
        let clock = Arc::new(FakeTimeSource::from_nanos(START_NANOS));
        let signer = Arc::new(Ed25519RootSigner::from_seed(SIGNING_SEED));
        let quota = Arc::new(quota);
        let factor = QuotaIncreaseFactor::default();
        let sequencer = Sequencer::new(
            Arc::new(quill_merkle::CompactTreeEngine::new()),
            clock.clone(),
            backend,
            signer.clone(),
            quota.clone(),
        )
        .with_quota_increase_factor(factor.clone());

        Self {
            storage,
            clock,
            signer,
            quota,
            factor,
            sequencer: Arc::new(sequencer),
        }
    }

    /// Create tree `id` with a signed empty root at revision 0.
    pub async fn init_tree(&self, id: i64) -> Tree {
        let tree = Tree::log(id);
        self.storage.create_tree(tree.id).unwrap();

        let root = LogRoot {
            tree_size: 0,
            root_hash: rfc6962::empty_root(),
            timestamp_nanos: self.now_nanos(),
            revision: 0,
            metadata: Vec::new(),
        };
        let signature = self
            .signer
            .sign(&RequestContext::new(), &root.to_canonical_bytes().unwrap())
            .await
            .unwrap();
        self.storage
            .install_root(tree.id, &SignedLogRoot { root, signature })
            .unwrap();
        tree
    }

    pub fn now_nanos(&self) -> u64 {
        to_nanos(self.clock.now())
    }

    pub fn tick(&self) {
        self.clock.advance(TICK);
    }

    /// Queue `count` distinct entries named `{prefix}-{i}` at the current
    /// clock time. Returns the entry values in queue order.
    pub fn queue(&self, tree_id: TreeId, prefix: &str, count: usize) -> Vec<Vec<u8>> {
        let now = self.now_nanos();
        let values: Vec<Vec<u8>> = (0..count)
            .map(|i| format!("{prefix}-{i}").into_bytes())
            .collect();
        let leaves = values
            .iter()
            .map(|v| Leaf::queued(rfc6962::hash_leaf(v), v.clone(), Vec::new(), now));
        self.storage.queue_leaves(tree_id, leaves).unwrap();
        values
    }

    /// Advance the clock and integrate up to `limit` leaves with no guard
    /// window and no forced re-signing.
    pub async fn integrate(&self, tree: &Tree, limit: usize) -> usize {
        self.tick();
        self.sequencer
            .integrate_batch(&RequestContext::new(), tree, limit, Duration::ZERO, Duration::ZERO)
            .await
            .unwrap()
    }

    pub fn latest_root(&self, tree_id: TreeId) -> LogRoot {
        self.storage
            .signed_roots(tree_id)
            .unwrap()
            .pop()
            .unwrap()
            .root
    }

    /// Check the committed history of `tree_id`:
    ///
    /// - every root verifies under the harness key
    /// - revisions run 0, 1, 2, ... without gaps
    /// - timestamps strictly increase and sizes never shrink
    /// - sequenced leaves occupy indices `0..size` exactly
    /// - the latest root hash matches a from-scratch recomputation
    pub fn verify_log(&self, tree_id: TreeId) {
        let key = self.signer.verifying_key();
        let roots = self.storage.signed_roots(tree_id).unwrap();
        assert!(!roots.is_empty(), "tree {tree_id} has no roots");

        for (i, signed) in roots.iter().enumerate() {
            verify_signed_log_root(&key, signed).unwrap();
            assert_eq!(signed.root.revision, i as u64, "revision gap in tree {tree_id}");
        }
        for pair in roots.windows(2) {
            assert!(
                pair[1].root.timestamp_nanos > pair[0].root.timestamp_nanos,
                "timestamp did not increase at revision {}",
                pair[1].root.revision
            );
            assert!(pair[1].root.tree_size >= pair[0].root.tree_size);
        }

        let latest = &roots[roots.len() - 1].root;
        let leaves = self.storage.sequenced_leaves(tree_id).unwrap();
        assert_eq!(leaves.len() as u64, latest.tree_size);
        for (i, leaf) in leaves.iter().enumerate() {
            assert_eq!(leaf.leaf_index, Some(i as u64));
            assert!(leaf.integrate_timestamp_nanos.is_some());
        }

        let hashes: Vec<_> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();
        assert_eq!(latest.root_hash, rfc6962::root_from_leaf_hashes(&hashes));
    }
}

impl Default for LogHarness {
    fn default() -> Self {
        Self::new()
    }
}
