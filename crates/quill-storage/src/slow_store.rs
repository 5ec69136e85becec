//! A [`LogStorage`] wrapper that adds configurable random IO latency.
//!
//! `SlowLogStorage` wraps any `Arc<dyn LogStorage>` and sleeps for a random
//! duration before each transaction read or write. The RNG is seeded for
//! deterministic, reproducible behaviour across test runs.
//!
//! # Example
//!
//! ```ignore
//! let slow = SlowLogStorage::new(inner)
//!     .read_latency(5, 20)    // 5–20 ms per read
//!     .write_latency(10, 30)  // 10–30 ms per write and commit
//!     .seed(42);
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use quill_types::{Leaf, Node, NodeId, RequestContext, SignedLogRoot, Tree};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::Result;
use crate::traits::{LogStorage, LogTreeTx};

/// Latency ranges and RNG shared by the wrapper and its transactions.
struct Latency {
    read_ms: (u64, u64),
    write_ms: (u64, u64),
    rng: Mutex<StdRng>,
}

impl Latency {
    fn shared(read_ms: (u64, u64), write_ms: (u64, u64), seed: u64) -> Arc<Self> {
        Arc::new(Self {
            read_ms,
            write_ms,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;

        if max == 0 {
            return;
        }

        let ms = if min >= max {
            max
        } else {
            self.rng
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn read(&self) {
        self.delay(self.read_ms).await;
    }

    async fn write(&self) {
        self.delay(self.write_ms).await;
    }
}

/// A [`LogStorage`] wrapper that injects random latency before IO operations.
///
/// Useful for exercising cancellation and interleavings that an instant
/// in-memory store never produces.
pub struct SlowLogStorage {
    inner: Arc<dyn LogStorage>,
    read_ms: (u64, u64),
    write_ms: (u64, u64),
    seed: u64,
    latency: Arc<Latency>,
}

impl SlowLogStorage {
    /// Wrap an existing store with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn LogStorage>) -> Self {
        Self {
            inner,
            read_ms: (0, 0),
            write_ms: (0, 0),
            seed: 0,
            latency: Latency::shared((0, 0), (0, 0), 0),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_ms = (min_ms, max_ms);
        self.rebuild()
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_ms = (min_ms, max_ms);
        self.rebuild()
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rebuild()
    }

    fn rebuild(mut self) -> Self {
        self.latency = Latency::shared(self.read_ms, self.write_ms, self.seed);
        self
    }
}

#[async_trait::async_trait]
impl LogStorage for SlowLogStorage {
    async fn begin(&self, ctx: &RequestContext, tree: &Tree) -> Result<Box<dyn LogTreeTx>> {
        self.latency.read().await;
        let inner = self.inner.begin(ctx, tree).await?;
        Ok(Box::new(SlowTreeTx {
            inner,
            latency: Arc::clone(&self.latency),
        }))
    }
}

struct SlowTreeTx {
    inner: Box<dyn LogTreeTx>,
    latency: Arc<Latency>,
}

#[async_trait::async_trait]
impl LogTreeTx for SlowTreeTx {
    fn write_revision(&self) -> u64 {
        self.inner.write_revision()
    }

    async fn latest_signed_log_root(&mut self, ctx: &RequestContext) -> Result<SignedLogRoot> {
        self.latency.read().await;
        self.inner.latest_signed_log_root(ctx).await
    }

    async fn dequeue_leaves(
        &mut self,
        ctx: &RequestContext,
        limit: usize,
        cutoff: SystemTime,
    ) -> Result<Vec<Leaf>> {
        self.latency.read().await;
        self.inner.dequeue_leaves(ctx, limit, cutoff).await
    }

    async fn get_merkle_nodes(&mut self, ctx: &RequestContext, ids: &[NodeId]) -> Result<Vec<Node>> {
        self.latency.read().await;
        self.inner.get_merkle_nodes(ctx, ids).await
    }

    async fn update_sequenced_leaves(&mut self, ctx: &RequestContext, leaves: &[Leaf]) -> Result<()> {
        self.latency.write().await;
        self.inner.update_sequenced_leaves(ctx, leaves).await
    }

    async fn set_merkle_nodes(&mut self, ctx: &RequestContext, nodes: &[Node]) -> Result<()> {
        self.latency.write().await;
        self.inner.set_merkle_nodes(ctx, nodes).await
    }

    async fn store_signed_log_root(&mut self, ctx: &RequestContext, root: &SignedLogRoot) -> Result<()> {
        self.latency.write().await;
        self.inner.store_signed_log_root(ctx, root).await
    }

    async fn commit(&mut self, ctx: &RequestContext) -> Result<()> {
        self.latency.write().await;
        self.inner.commit(ctx).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
