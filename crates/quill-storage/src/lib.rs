//! Log tree storage traits and backend implementations.
//!
//! This crate defines the [`LogStorage`] and [`LogTreeTx`] traits the
//! sequencer runs its transactions through, along with two backends:
//!
//! - [`MemoryLogStorage`]: in-memory storage with optimistic revision checks.
//! - [`SlowLogStorage`]: a latency-injecting wrapper around any backend.

mod error;
mod memory_store;
mod slow_store;
mod traits;

pub use error::{Result, StorageError};
pub use memory_store::{MemoryLogStorage, MemoryTreeTx};
pub use slow_store::SlowLogStorage;
pub use traits::{LogStorage, LogTreeTx};
