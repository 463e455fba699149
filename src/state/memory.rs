//! In-memory state storage
//!
//! Used by simulations and tests. Supports injecting persist failures to
//! exercise the "persist before publish" path of its owners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::errors::{StorageError, StorageResult};
use super::StateStorage;

/// Volatile storage holding a clone of the last persisted state.
#[derive(Debug, Default)]
pub struct InMemoryStateStorage<T> {
    state: Mutex<Option<T>>,
    persist_count: AtomicU64,
    fail_next_persists: AtomicU64,
}

impl<T: Clone> InMemoryStateStorage<T> {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            persist_count: AtomicU64::new(0),
            fail_next_persists: AtomicU64::new(0),
        }
    }

    /// Create a storage that already holds `state`.
    pub fn with_state(state: T) -> Self {
        let storage = Self::new();
        *storage.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
        storage
    }

    /// Make the next `count` calls to `persist` fail.
    pub fn fail_next_persists(&self, count: u64) {
        self.fail_next_persists.store(count, Ordering::SeqCst);
    }

    /// Number of successful persists.
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::SeqCst)
    }

    /// Last persisted state.
    pub fn current(&self) -> Option<T> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: Clone + Send> StateStorage<T> for InMemoryStateStorage<T> {
    fn load(&self) -> StorageResult<Option<T>> {
        Ok(self.current())
    }

    fn persist(&self, state: &T) -> StorageResult<()> {
        let injected = self
            .fail_next_persists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected persist failure".to_string()));
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
