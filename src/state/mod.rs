//! Durable state storage
//!
//! Key-value persistence used by the session tracker (and any other owner of
//! recoverable replication state). Each storage instance owns exactly one key:
//! the state name it was opened with.
//!
//! - `persist` is durable when it returns `Ok`
//! - `load` returns the last successfully persisted state, or `None`
//! - A torn or corrupted state file is an error, never silently ignored

mod checksum;
mod durable;
mod errors;
mod memory;

use std::sync::Arc;

pub use checksum::{compute_checksum, verify_checksum};
pub use durable::DurableStateStorage;
pub use errors::{StorageError, StorageResult};
pub use memory::InMemoryStateStorage;

/// Persistence of a single named piece of state.
pub trait StateStorage<T>: Send + Sync {
    /// Load the last persisted state, if any was ever persisted.
    fn load(&self) -> StorageResult<Option<T>>;

    /// Persist `state`, replacing the previous value.
    fn persist(&self, state: &T) -> StorageResult<()>;
}

impl<T, S> StateStorage<T> for Arc<S>
where
    S: StateStorage<T> + ?Sized,
{
    fn load(&self) -> StorageResult<Option<T>> {
        (**self).load()
    }

    fn persist(&self, state: &T) -> StorageResult<()> {
        (**self).persist(state)
    }
}
