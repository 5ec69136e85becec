//! Tests for the sequencer crate.
//!
//! The sequencer runs against a scripted storage transaction that records
//! every call, so each test can assert exactly which steps ran.


use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use quill_crypto::{RootSigner, SignerError};
use quill_merkle::CompactTreeEngine;
use quill_merkle::rfc6962::hash_leaf;
use quill_quota::{QuotaError, QuotaManager, QuotaSpec};
use quill_storage::{LogStorage, LogTreeTx, StorageError};
use quill_types::{
    FakeTimeSource, Leaf, LogRoot, Node, NodeId, RequestContext, SignedLogRoot, Tree, TreeId,
    to_nanos,
};

use crate::Sequencer;

const TREE_ID: TreeId = TreeId(154035);

/// 2016-05-25T10:55:05Z.
const FAKE_TIME_NANOS: u64 = 1_464_173_705_000_000_000;

const MILLI: u64 = 1_000_000;

/// Root hash of the scripted size-16 tree.
const ROOT16_HASH: [u8; 32] = [0x5a; 32];

/// Root after appending `testdataforleaf` to the size-16 tree.
const ROOT17_HEX: &str = "ace3f2d312079ccc161d54b79d62b2b8d6108ca14c020cc3f2ad4ae7e483e013";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn tree() -> Tree {
    Tree::log(TREE_ID)
}

fn signed(root: LogRoot) -> SignedLogRoot {
    SignedLogRoot {
        root,
        signature: b"signed".to_vec(),
    }
}

/// Size-16 root at revision 5, `offset_millis` away from the fake clock.
fn root16(offset_millis: i64) -> SignedLogRoot {
    let timestamp_nanos = FAKE_TIME_NANOS.saturating_add_signed(offset_millis * MILLI as i64);
    signed(LogRoot {
        tree_size: 16,
        root_hash: ROOT16_HASH,
        timestamp_nanos,
        revision: 5,
        metadata: Vec::new(),
    })
}

fn leaf16() -> Leaf {
    let value = b"testdataforleaf".to_vec();
    Leaf::queued(hash_leaf(&value), value, Vec::new(), FAKE_TIME_NANOS - 20 * MILLI)
}

fn numbered_leaves(n: usize) -> Vec<Leaf> {
    (0..n)
        .map(|i| {
            let value = format!("leaf-{i}").into_bytes();
            Leaf::queued(hash_leaf(&value), value, Vec::new(), 0)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scripted storage
// ---------------------------------------------------------------------------

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq)]
enum Call {
    Begin(TreeId),
    LatestRoot,
    Dequeue { limit: usize, cutoff_nanos: u64 },
    GetNodes(Vec<NodeId>),
    UpdateLeaves(Vec<Leaf>),
    SetNodes(Vec<Node>),
    StoreRoot(SignedLogRoot),
    Commit,
    Close,
}

/// What the latest-root read returns.
#[derive(Clone)]
enum RootScript {
    Root(SignedLogRoot),
    NeedsInit,
    Fail(&'static str),
}

/// Behaviour of the scripted storage. `fail_*` fields make that step fail
/// with a backend error carrying the message.
#[derive(Clone)]
struct Script {
    write_revision: u64,
    latest_root: RootScript,
    dequeued: Vec<Leaf>,
    nodes: Vec<Node>,
    dequeue_delay: Option<Duration>,
    cancel_on_commit: bool,
    fail_begin: Option<&'static str>,
    fail_dequeue: Option<&'static str>,
    fail_get_nodes: Option<&'static str>,
    fail_update_leaves: Option<&'static str>,
    fail_set_nodes: Option<&'static str>,
    fail_store_root: Option<&'static str>,
    fail_commit: Option<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            write_revision: 6,
            latest_root: RootScript::Root(root16(-10)),
            dequeued: Vec::new(),
            nodes: Vec::new(),
            dequeue_delay: None,
            cancel_on_commit: false,
            fail_begin: None,
            fail_dequeue: None,
            fail_get_nodes: None,
            fail_update_leaves: None,
            fail_set_nodes: None,
            fail_store_root: None,
            fail_commit: None,
        }
    }
}

fn fail(msg: Option<&'static str>) -> Result<(), StorageError> {
    match msg {
        Some(m) => Err(StorageError::Backend(m.to_string())),
        None => Ok(()),
    }
}

struct ScriptedStorage {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedStorage {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn stored_roots(&self) -> Vec<SignedLogRoot> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::StoreRoot(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// No leaf, node or root write was attempted.
    fn assert_no_writes(&self) {
        assert_eq!(
            self.count(|c| matches!(
                c,
                Call::UpdateLeaves(_) | Call::SetNodes(_) | Call::StoreRoot(_) | Call::Commit
            )),
            0,
            "unexpected writes: {:?}",
            self.calls()
        );
    }

    /// The transaction was closed exactly once, as the last call.
    fn assert_closed(&self) {
        let calls = self.calls();
        assert_eq!(calls.last(), Some(&Call::Close), "calls: {calls:?}");
        assert_eq!(self.count(|c| *c == Call::Close), 1);
    }
}

#[async_trait::async_trait]
impl LogStorage for ScriptedStorage {
    async fn begin(
        &self,
        _ctx: &RequestContext,
        tree: &Tree,
    ) -> Result<Box<dyn LogTreeTx>, StorageError> {
        self.calls.lock().unwrap().push(Call::Begin(tree.id));
        fail(self.script.fail_begin)?;
        Ok(Box::new(ScriptedTx {
            script: self.script.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct ScriptedTx {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedTx {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl LogTreeTx for ScriptedTx {
    fn write_revision(&self) -> u64 {
        self.script.write_revision
    }

    async fn latest_signed_log_root(
        &mut self,
        _ctx: &RequestContext,
    ) -> Result<SignedLogRoot, StorageError> {
        self.record(Call::LatestRoot);
        match &self.script.latest_root {
            RootScript::Root(root) => Ok(root.clone()),
            RootScript::NeedsInit => Err(StorageError::TreeNeedsInit(TREE_ID)),
            RootScript::Fail(msg) => Err(StorageError::Backend(msg.to_string())),
        }
    }

    async fn dequeue_leaves(
        &mut self,
        _ctx: &RequestContext,
        limit: usize,
        cutoff: SystemTime,
    ) -> Result<Vec<Leaf>, StorageError> {
        self.record(Call::Dequeue {
            limit,
            cutoff_nanos: to_nanos(cutoff),
        });
        if let Some(delay) = self.script.dequeue_delay {
            tokio::time::sleep(delay).await;
        }
        fail(self.script.fail_dequeue)?;
        Ok(self.script.dequeued.clone())
    }

    async fn get_merkle_nodes(
        &mut self,
        _ctx: &RequestContext,
        ids: &[NodeId],
    ) -> Result<Vec<Node>, StorageError> {
        self.record(Call::GetNodes(ids.to_vec()));
        fail(self.script.fail_get_nodes)?;
        Ok(self
            .script
            .nodes
            .iter()
            .filter(|n| ids.contains(&n.id))
            .cloned()
            .collect())
    }

    async fn update_sequenced_leaves(
        &mut self,
        _ctx: &RequestContext,
        leaves: &[Leaf],
    ) -> Result<(), StorageError> {
        self.record(Call::UpdateLeaves(leaves.to_vec()));
        fail(self.script.fail_update_leaves)
    }

    async fn set_merkle_nodes(
        &mut self,
        _ctx: &RequestContext,
        nodes: &[Node],
    ) -> Result<(), StorageError> {
        self.record(Call::SetNodes(nodes.to_vec()));
        fail(self.script.fail_set_nodes)
    }

    async fn store_signed_log_root(
        &mut self,
        _ctx: &RequestContext,
        root: &SignedLogRoot,
    ) -> Result<(), StorageError> {
        self.record(Call::StoreRoot(root.clone()));
        fail(self.script.fail_store_root)
    }

    async fn commit(&mut self, ctx: &RequestContext) -> Result<(), StorageError> {
        self.record(Call::Commit);
        fail(self.script.fail_commit)?;
        if self.script.cancel_on_commit {
            ctx.cancel();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.record(Call::Close);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signers and quota
// ---------------------------------------------------------------------------

/// Signer returning a constant signature.
struct FixedSigner(&'static [u8]);

#[async_trait::async_trait]
impl RootSigner for FixedSigner {
    async fn sign(&self, _ctx: &RequestContext, _message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.0.to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Signer that always fails.
struct FailingSigner(&'static str);

#[async_trait::async_trait]
impl RootSigner for FailingSigner {
    async fn sign(&self, _ctx: &RequestContext, _message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::Signing(self.0.to_string()))
    }

    fn public_key(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Quota manager recording `put_tokens` calls.
#[derive(Default)]
struct RecordingQuota {
    puts: Mutex<Vec<(u64, Vec<QuotaSpec>)>>,
    fail: bool,
}

impl RecordingQuota {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn puts(&self) -> Vec<(u64, Vec<QuotaSpec>)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QuotaManager for RecordingQuota {
    async fn get_tokens(
        &self,
        _ctx: &RequestContext,
        _tokens: u64,
        _specs: &[QuotaSpec],
    ) -> Result<(), QuotaError> {
        Ok(())
    }

    async fn put_tokens(
        &self,
        _ctx: &RequestContext,
        tokens: u64,
        specs: &[QuotaSpec],
    ) -> Result<(), QuotaError> {
        self.puts.lock().unwrap().push((tokens, specs.to_vec()));
        if self.fail {
            return Err(QuotaError::Unavailable("quota down".to_string()));
        }
        Ok(())
    }

    async fn reset_quota(&self, _ctx: &RequestContext, _specs: &[QuotaSpec]) -> Result<(), QuotaError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    storage: Arc<ScriptedStorage>,
    quota: Arc<RecordingQuota>,
    sequencer: Sequencer,
}

fn harness(script: Script) -> Harness {
    build(script, Arc::new(FixedSigner(b"signed")), RecordingQuota::default())
}

fn build(script: Script, signer: Arc<dyn RootSigner>, quota: RecordingQuota) -> Harness {
    let storage = Arc::new(ScriptedStorage::new(script));
    let quota = Arc::new(quota);
    let sequencer = Sequencer::new(
        Arc::new(CompactTreeEngine::new()),
        Arc::new(FakeTimeSource::from_nanos(FAKE_TIME_NANOS)),
        storage.clone(),
        signer,
        quota.clone(),
    );
    Harness {
        storage,
        quota,
        sequencer,
    }
}
