//! Batch sequencer for a verifiable append-only log.
//!
//! [`Sequencer::integrate_batch`] pulls queued leaves for one tree, assigns
//! them permanent indices, extends the Merkle tree, signs a new root and
//! commits it all in a single storage transaction. [`Sequencer::sign_root`]
//! re-signs the current root with a fresh timestamp.
//!
//! Quota tokens for committed work are returned through the
//! [`QuotaManager`](quill_quota::QuotaManager), scaled by the shared
//! [`QuotaIncreaseFactor`].

pub mod config;
pub mod error;
mod factor;
mod sequencer;

#[cfg(test)]
mod tests;

pub use config::{BatchParams, ConfigError, SequencerConfig};
pub use error::{Result, SequencerError};
pub use factor::QuotaIncreaseFactor;
pub use sequencer::Sequencer;
