//! In-memory log storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use quill_types::{
    Hash, Leaf, Node, NodeId, RequestContext, SignedLogRoot, Tree, TreeId, to_nanos,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::traits::{LogStorage, LogTreeTx};

/// Queue ordering key: `(queue_timestamp_nanos, admission sequence)`.
type QueueKey = (u64, u64);

/// Committed records of one tree, postcard-encoded.
#[derive(Default)]
struct TreeRecords {
    roots: BTreeMap<u64, Vec<u8>>,
    leaves: BTreeMap<u64, Vec<u8>>,
    queue: BTreeMap<QueueKey, Vec<u8>>,
    nodes: HashMap<NodeId, Vec<u8>>,
    next_seq: u64,
}

impl TreeRecords {
    fn latest_revision(&self) -> Option<u64> {
        self.roots.keys().next_back().copied()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(postcard::from_bytes(bytes)?)
}

fn lock(records: &Mutex<TreeRecords>) -> MutexGuard<'_, TreeRecords> {
    records.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory log storage backed by a `RwLock<HashMap>` of per-tree records.
///
/// Transactions are optimistic: each one remembers the revision it read at
/// [`begin`](LogStorage::begin) and its commit is rejected with
/// [`StorageError::RevisionConflict`] if another transaction committed to
/// the same tree in between. Commits to one tree are serialised by that
/// tree's mutex; distinct trees never contend.
#[derive(Default)]
pub struct MemoryLogStorage {
    trees: RwLock<HashMap<TreeId, Arc<Mutex<TreeRecords>>>>,
}

impl MemoryLogStorage {
    /// Create an empty store with no trees.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self, tree_id: TreeId) -> Result<Arc<Mutex<TreeRecords>>> {
        let trees = self.trees.read().unwrap_or_else(|e| e.into_inner());
        trees
            .get(&tree_id)
            .cloned()
            .ok_or(StorageError::TreeNotFound(tree_id))
    }

    /// Register a new, uninitialised tree.
    pub fn create_tree(&self, tree_id: TreeId) -> Result<()> {
        let mut trees = self.trees.write().unwrap_or_else(|e| e.into_inner());
        if trees.contains_key(&tree_id) {
            return Err(StorageError::TreeExists(tree_id));
        }
        trees.insert(tree_id, Arc::default());
        debug!(%tree_id, "created tree");
        Ok(())
    }

    /// Install the first signed root of a tree.
    ///
    /// This is the bootstrap hook used in place of a full log initialiser.
    pub fn install_root(&self, tree_id: TreeId, root: &SignedLogRoot) -> Result<()> {
        let records = self.records(tree_id)?;
        let mut records = lock(&records);
        if !records.roots.is_empty() {
            return Err(StorageError::AlreadyInitialised(tree_id));
        }
        records.roots.insert(root.root.revision, encode(root)?);
        debug!(%tree_id, revision = root.root.revision, "installed initial root");
        Ok(())
    }

    /// Admit leaves to the tree's sequencing queue. Returns the number queued.
    pub fn queue_leaves(&self, tree_id: TreeId, leaves: impl IntoIterator<Item = Leaf>) -> Result<usize> {
        let records = self.records(tree_id)?;
        let mut records = lock(&records);
        let mut count = 0;
        for leaf in leaves {
            let key = (leaf.queue_timestamp_nanos, records.next_seq);
            records.next_seq += 1;
            records.queue.insert(key, encode(&leaf)?);
            count += 1;
        }
        debug!(%tree_id, count, "queued leaves");
        Ok(count)
    }

    /// All committed signed roots, oldest first.
    pub fn signed_roots(&self, tree_id: TreeId) -> Result<Vec<SignedLogRoot>> {
        let records = self.records(tree_id)?;
        let records = lock(&records);
        records.roots.values().map(|b| decode(b)).collect()
    }

    /// All sequenced leaves in index order.
    pub fn sequenced_leaves(&self, tree_id: TreeId) -> Result<Vec<Leaf>> {
        let records = self.records(tree_id)?;
        let records = lock(&records);
        records.leaves.values().map(|b| decode(b)).collect()
    }

    /// Number of leaves still waiting to be sequenced.
    pub fn queued_len(&self, tree_id: TreeId) -> Result<usize> {
        let records = self.records(tree_id)?;
        let records = lock(&records);
        Ok(records.queue.len())
    }

    /// All stored Merkle nodes, in no particular order.
    pub fn merkle_nodes(&self, tree_id: TreeId) -> Result<Vec<Node>> {
        let records = self.records(tree_id)?;
        let records = lock(&records);
        records.nodes.values().map(|b| decode(b)).collect()
    }
}

#[async_trait::async_trait]
impl LogStorage for MemoryLogStorage {
    async fn begin(&self, ctx: &RequestContext, tree: &Tree) -> Result<Box<dyn LogTreeTx>> {
        ctx.check()?;
        let records = self.records(tree.id)?;
        let read_revision = lock(&records).latest_revision();
        let write_revision = read_revision.map_or(0, |r| r + 1);
        debug!(tree_id = %tree.id, ?read_revision, write_revision, "began transaction");

        Ok(Box::new(MemoryTreeTx {
            tree_id: tree.id,
            records,
            read_revision,
            write_revision,
            dequeued: Vec::new(),
            staged_leaves: Vec::new(),
            staged_nodes: Vec::new(),
            staged_root: None,
            finished: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Transaction over one tree of a [`MemoryLogStorage`].
pub struct MemoryTreeTx {
    tree_id: TreeId,
    records: Arc<Mutex<TreeRecords>>,
    read_revision: Option<u64>,
    write_revision: u64,
    dequeued: Vec<(QueueKey, Hash)>,
    staged_leaves: Vec<Leaf>,
    staged_nodes: Vec<Node>,
    staged_root: Option<SignedLogRoot>,
    finished: bool,
}

impl MemoryTreeTx {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            Err(StorageError::TxFinished)
        } else {
            Ok(())
        }
    }

    fn discard(&mut self) {
        self.dequeued.clear();
        self.staged_leaves.clear();
        self.staged_nodes.clear();
        self.staged_root = None;
    }
}

#[async_trait::async_trait]
impl LogTreeTx for MemoryTreeTx {
    fn write_revision(&self) -> u64 {
        self.write_revision
    }

    async fn latest_signed_log_root(&mut self, _ctx: &RequestContext) -> Result<SignedLogRoot> {
        self.ensure_open()?;
        let revision = self
            .read_revision
            .ok_or(StorageError::TreeNeedsInit(self.tree_id))?;
        let records = lock(&self.records);
        let bytes = records
            .roots
            .get(&revision)
            .ok_or(StorageError::TreeNeedsInit(self.tree_id))?;
        decode(bytes)
    }

    async fn dequeue_leaves(
        &mut self,
        _ctx: &RequestContext,
        limit: usize,
        cutoff: SystemTime,
    ) -> Result<Vec<Leaf>> {
        self.ensure_open()?;
        let cutoff_nanos = to_nanos(cutoff);
        let records = lock(&self.records);

        let mut leaves = Vec::new();
        for (key, bytes) in records.queue.range(..=(cutoff_nanos, u64::MAX)) {
            if leaves.len() >= limit {
                break;
            }
            if self.dequeued.iter().any(|(k, _)| k == key) {
                continue;
            }
            let leaf: Leaf = decode(bytes)?;
            self.dequeued.push((*key, leaf.merkle_leaf_hash));
            leaves.push(leaf);
        }
        debug!(tree_id = %self.tree_id, count = leaves.len(), cutoff_nanos, "dequeued leaves");
        Ok(leaves)
    }

    async fn get_merkle_nodes(&mut self, _ctx: &RequestContext, ids: &[NodeId]) -> Result<Vec<Node>> {
        self.ensure_open()?;
        let records = lock(&self.records);
        ids.iter()
            .filter_map(|id| records.nodes.get(id))
            .map(|b| decode(b))
            .collect()
    }

    async fn update_sequenced_leaves(&mut self, _ctx: &RequestContext, leaves: &[Leaf]) -> Result<()> {
        self.ensure_open()?;
        if let Some(leaf) = leaves
            .iter()
            .find(|l| l.leaf_index.is_none() || l.integrate_timestamp_nanos.is_none())
        {
            return Err(StorageError::UnsequencedLeaf(hex::encode(leaf.merkle_leaf_hash)));
        }
        self.staged_leaves.extend_from_slice(leaves);
        Ok(())
    }

    async fn set_merkle_nodes(&mut self, _ctx: &RequestContext, nodes: &[Node]) -> Result<()> {
        self.ensure_open()?;
        self.staged_nodes.extend_from_slice(nodes);
        Ok(())
    }

    async fn store_signed_log_root(&mut self, _ctx: &RequestContext, root: &SignedLogRoot) -> Result<()> {
        self.ensure_open()?;
        if root.root.revision != self.write_revision {
            return Err(StorageError::RootRevisionMismatch {
                root: root.root.revision,
                write_revision: self.write_revision,
            });
        }
        self.staged_root = Some(root.clone());
        Ok(())
    }

    async fn commit(&mut self, ctx: &RequestContext) -> Result<()> {
        self.ensure_open()?;
        ctx.check()?;

        let mut records = lock(&self.records);
        let stored = records.latest_revision();
        if stored != self.read_revision {
            return Err(StorageError::RevisionConflict {
                tree_id: self.tree_id,
                write_revision: self.write_revision,
                stored: stored.unwrap_or_default(),
            });
        }

        // Encode and validate everything before touching committed state.
        let mut leaf_records = Vec::with_capacity(self.staged_leaves.len());
        for leaf in &self.staged_leaves {
            let index = leaf.leaf_index.unwrap_or_default();
            if records.leaves.contains_key(&index) {
                return Err(StorageError::LeafIndexConflict {
                    tree_id: self.tree_id,
                    index,
                });
            }
            leaf_records.push((index, leaf.merkle_leaf_hash, encode(leaf)?));
        }
        let node_records = self
            .staged_nodes
            .iter()
            .map(|n| Ok((n.id, encode(n)?)))
            .collect::<Result<Vec<_>>>()?;
        let root_record = match &self.staged_root {
            Some(root) => Some((root.root.revision, encode(root)?)),
            None => None,
        };

        let mut pending = std::mem::take(&mut self.dequeued);
        for (index, hash, bytes) in leaf_records {
            if let Some(pos) = pending.iter().position(|(_, h)| *h == hash) {
                let (key, _) = pending.swap_remove(pos);
                records.queue.remove(&key);
            }
            records.leaves.insert(index, bytes);
        }
        for (id, bytes) in node_records {
            records.nodes.insert(id, bytes);
        }
        if let Some((revision, bytes)) = root_record {
            records.roots.insert(revision, bytes);
        }
        drop(records);

        debug!(
            tree_id = %self.tree_id,
            revision = self.write_revision,
            leaves = self.staged_leaves.len(),
            nodes = self.staged_nodes.len(),
            root = self.staged_root.is_some(),
            "committed transaction"
        );
        self.discard();
        self.finished = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.dequeued.is_empty() || self.staged_root.is_some() {
            warn!(
                tree_id = %self.tree_id,
                dequeued = self.dequeued.len(),
                "rolling back uncommitted transaction"
            );
        }
        self.discard();
        self.finished = true;
        Ok(())
    }
}
