//! RFC 6962 Merkle tree hashing and incremental log tree extension.
//!
//! [`CompactTreeEngine`] is the production [`HashTreeEngine`]: it rebuilds
//! the compact range of the current tree from a handful of stored nodes,
//! appends a batch of leaves, and reports every node it touched so storage
//! can persist them at the new revision.

pub mod compact;
pub mod engine;
pub mod error;
pub mod rfc6962;

pub use compact::CompactRange;
pub use engine::{AppendOutcome, CompactTreeEngine, HashTreeEngine, PriorTree};
pub use error::MerkleError;
