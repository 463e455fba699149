//! Progress of one in-flight operation
//!
//! A one-shot result slot with a single consumer, plus a "committed" flag set
//! by the commit notification before the result is known. Resolution happens
//! at most once; a second attempt is a logged no-op.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::observability::{log_event, Event};
use crate::replication::{CommandOutcome, DistributedOperationId, ReplicationResult};

/// Why [`Progress::await_replication`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationWait {
    /// Committed or already resolved: stop resubmitting.
    Committed,
    /// Something changed (e.g. a new leader): resubmit now.
    ReplicationEvent,
    /// Nothing happened within the timeout.
    TimedOut,
}

#[derive(Debug, Default)]
struct ProgressState {
    committed: bool,
    replication_events: u64,
    result: Option<ReplicationResult<CommandOutcome>>,
}

/// Handle shared between the submitting caller and the resolving applier.
#[derive(Debug)]
pub struct Progress {
    operation_id: DistributedOperationId,
    state: Mutex<ProgressState>,
    changed: Condvar,
}

impl Progress {
    pub(crate) fn new(operation_id: DistributedOperationId) -> Self {
        Self {
            operation_id,
            state: Mutex::new(ProgressState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn operation_id(&self) -> DistributedOperationId {
        self.operation_id
    }

    /// Wait up to `timeout` for the operation to be committed.
    pub fn await_replication(&self, timeout: Duration) -> ReplicationWait {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        let events_at_start = state.replication_events;

        loop {
            if state.committed || state.result.is_some() {
                return ReplicationWait::Committed;
            }
            if state.replication_events != events_at_start {
                return ReplicationWait::ReplicationEvent;
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return ReplicationWait::TimedOut;
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Wait for the result. `None` means `deadline` passed first.
    pub fn await_result(
        &self,
        deadline: Option<Instant>,
    ) -> Option<ReplicationResult<CommandOutcome>> {
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return Some(result.clone());
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Mark the operation as committed by consensus.
    pub fn set_committed(&self) {
        self.lock().committed = true;
        self.changed.notify_all();
    }

    /// Wake a waiter in [`await_replication`](Self::await_replication) so it
    /// resubmits immediately.
    pub fn trigger_replication_event(&self) {
        self.lock().replication_events += 1;
        self.changed.notify_all();
    }

    /// Resolve the progress. Returns `false` (and changes nothing) if it was
    /// already resolved.
    pub fn set_result(&self, result: ReplicationResult<CommandOutcome>) -> bool {
        let mut state = self.lock();
        if state.result.is_some() {
            drop(state);
            log_event(
                Event::DoubleResolution,
                &[("operation", &self.operation_id.to_string())],
            );
            return false;
        }
        state.result = Some(result);
        drop(state);

        self.changed.notify_all();
        true
    }

    /// Current result without waiting.
    pub fn result(&self) -> Option<ReplicationResult<CommandOutcome>> {
        self.lock().result.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().result.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
