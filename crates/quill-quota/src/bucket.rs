//! Token bucket quota manager.
//!
//! Each configured [`QuotaSpec`] owns a bucket with a fixed capacity that
//! optionally refills over time. Specs without a bucket are unlimited.

use std::collections::HashMap;

use quill_types::RequestContext;
use tokio::time::Instant;
use tracing::debug;

use crate::{QuotaError, QuotaManager, QuotaSpec, Result};

struct Bucket {
    available: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u64, refill_per_sec: f64) -> Self {
        Self {
            available: capacity as f64,
            capacity: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time since last refill.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.available = (self.available + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }
}

/// In-process [`QuotaManager`] built from token buckets.
///
/// `get_tokens` is all-or-nothing across the requested specs.
/// `put_tokens` refunds up to each bucket's capacity.
#[derive(Default)]
pub struct TokenBucketQuotaManager {
    buckets: tokio::sync::Mutex<HashMap<QuotaSpec, Bucket>>,
}

impl TokenBucketQuotaManager {
    /// A manager with no buckets: every spec is unlimited.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket for `spec`, starting full.
    pub fn with_bucket(mut self, spec: QuotaSpec, capacity: u64, refill_per_sec: f64) -> Self {
        self.buckets
            .get_mut()
            .insert(spec, Bucket::new(capacity, refill_per_sec));
        self
    }

    /// Tokens currently available for `spec`, or `None` if it is unlimited.
    pub async fn available(&self, spec: &QuotaSpec) -> Option<u64> {
        let mut buckets = self.buckets.lock().await;
        buckets.get_mut(spec).map(|b| {
            b.refill();
            b.available.floor() as u64
        })
    }
}

#[async_trait::async_trait]
impl QuotaManager for TokenBucketQuotaManager {
    async fn get_tokens(&self, ctx: &RequestContext, tokens: u64, specs: &[QuotaSpec]) -> Result<()> {
        ctx.check()?;
        let requested = tokens as f64;
        let mut buckets = self.buckets.lock().await;

        for spec in specs {
            if let Some(bucket) = buckets.get_mut(spec) {
                bucket.refill();
                if bucket.available < requested {
                    return Err(QuotaError::Exhausted {
                        spec: *spec,
                        requested: tokens,
                        available: bucket.available.floor() as u64,
                    });
                }
            }
        }
        for spec in specs {
            if let Some(bucket) = buckets.get_mut(spec) {
                bucket.available -= requested;
            }
        }
        debug!(tokens, specs = specs.len(), "quota tokens acquired");
        Ok(())
    }

    async fn put_tokens(&self, ctx: &RequestContext, tokens: u64, specs: &[QuotaSpec]) -> Result<()> {
        ctx.check()?;
        let mut buckets = self.buckets.lock().await;
        for spec in specs {
            if let Some(bucket) = buckets.get_mut(spec) {
                bucket.refill();
                bucket.available = (bucket.available + tokens as f64).min(bucket.capacity);
            }
        }
        debug!(tokens, specs = specs.len(), "quota tokens returned");
        Ok(())
    }

    async fn reset_quota(&self, ctx: &RequestContext, specs: &[QuotaSpec]) -> Result<()> {
        ctx.check()?;
        let mut buckets = self.buckets.lock().await;
        for spec in specs {
            if let Some(bucket) = buckets.get_mut(spec) {
                bucket.available = bucket.capacity;
                bucket.last_refill = Instant::now();
            }
        }
        debug!(specs = specs.len(), "quota reset");
        Ok(())
    }
}
