//! Process-wide multiplier for tokens returned to the quota manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Multiplier applied to the number of integrated leaves when returning
/// quota tokens.
///
/// Values below 1 are treated as 1. Clones share the same value, so a
/// config reload can update a running sequencer.
#[derive(Debug, Clone)]
pub struct QuotaIncreaseFactor(Arc<AtomicU64>);

impl QuotaIncreaseFactor {
    pub fn new(factor: f64) -> Self {
        Self(Arc::new(AtomicU64::new(factor.to_bits())))
    }

    /// Current raw value, before clamping.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, factor: f64) {
        self.0.store(factor.to_bits(), Ordering::Relaxed);
    }

    /// Tokens to return for `leaves` integrated leaves:
    /// `ceil(leaves * max(factor, 1))`.
    pub fn tokens_for(&self, leaves: usize) -> u64 {
        let factor = self.get();
        let factor = if factor.is_nan() { 1.0 } else { factor.max(1.0) };
        let raw = leaves as f64 * factor;
        // 100 * 1.1 is 110.00000000000001 in binary floating point.
        let rounded = raw.round();
        let tokens = if (raw - rounded).abs() < 1e-9 {
            rounded
        } else {
            raw.ceil()
        };
        tokens as u64
    }
}

impl Default for QuotaIncreaseFactor {
    fn default() -> Self {
        Self::new(1.0)
    }
}
