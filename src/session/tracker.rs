//! Session Tracker
//!
//! Durable record of the last applied sequence number per
//! `(global session, local session)`, used by the applier to tell a first
//! application from a duplicate of a retried operation.
//!
//! - Mutated only by the single applier, in commit order
//! - New state is persisted before it is published; a failed persist leaves
//!   the published state untouched
//! - For any local session the recorded sequence number grows by exactly 1
//!   per application
//! - The last processed log index, duplicates included, is stored alongside,
//!   so a replayed commit stream after restart does not double-count and the
//!   applied watermark restarts where it stopped

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::{GlobalSession, MemberId};
use super::local::LocalOperationId;
use crate::observability::{log_event, Event};
use crate::replication::{ReplicationError, ReplicationResult};
use crate::state::StateStorage;

/// Outcome of checking an operation against the tracked sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationValidation {
    /// Immediate successor of the last applied operation: apply it.
    FirstApplication,
    /// Already applied: acknowledge, do not re-execute.
    Duplicate { last_applied: i64 },
    /// Skips ahead of its session; a consistency violation.
    Gap { last_applied: i64 },
}

impl OperationValidation {
    fn classify(last_applied: i64, sequence_number: i64) -> Self {
        if sequence_number == last_applied + 1 {
            Self::FirstApplication
        } else if sequence_number <= last_applied {
            Self::Duplicate { last_applied }
        } else {
            Self::Gap { last_applied }
        }
    }
}

/// Local-session progress of one global session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSessionRecord {
    owner: MemberId,
    last_applied: BTreeMap<i64, i64>,
}

impl GlobalSessionRecord {
    pub fn owner(&self) -> MemberId {
        self.owner
    }

    /// `local session id -> last applied sequence number`
    pub fn local_sessions(&self) -> &BTreeMap<i64, i64> {
        &self.last_applied
    }
}

/// Persisted state of the session tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSessionTrackerState {
    log_index: i64,
    sessions: BTreeMap<Uuid, GlobalSessionRecord>,
}

impl Default for GlobalSessionTrackerState {
    fn default() -> Self {
        Self {
            log_index: -1,
            sessions: BTreeMap::new(),
        }
    }
}

impl GlobalSessionTrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log index of the last processed entry, -1 if none.
    pub fn log_index(&self) -> i64 {
        self.log_index
    }

    /// Tracked global sessions.
    pub fn sessions(&self) -> &BTreeMap<Uuid, GlobalSessionRecord> {
        &self.sessions
    }

    /// Last applied sequence number, or -1 if the local session is unknown.
    pub fn last_applied_sequence_number(&self, session_id: Uuid, local_session_id: i64) -> i64 {
        self.sessions
            .get(&session_id)
            .and_then(|record| record.last_applied.get(&local_session_id))
            .copied()
            .unwrap_or(-1)
    }

    pub fn validate_operation(
        &self,
        global_session: &GlobalSession,
        operation_id: &LocalOperationId,
    ) -> OperationValidation {
        let last_applied = self.last_applied_sequence_number(
            global_session.session_id(),
            operation_id.local_session_id(),
        );
        OperationValidation::classify(last_applied, operation_id.sequence_number())
    }

    fn record(
        &mut self,
        global_session: &GlobalSession,
        operation_id: &LocalOperationId,
        log_index: i64,
    ) -> ReplicationResult<()> {
        match self.validate_operation(global_session, operation_id) {
            OperationValidation::FirstApplication => {}
            OperationValidation::Duplicate { last_applied }
            | OperationValidation::Gap { last_applied } => {
                return Err(ReplicationError::session_gap(format!(
                    "operation {} of {} is out of sequence (last applied {})",
                    operation_id, global_session, last_applied
                )));
            }
        }

        let record = self
            .sessions
            .entry(global_session.session_id())
            .or_insert_with(|| GlobalSessionRecord {
                owner: global_session.owner(),
                last_applied: BTreeMap::new(),
            });
        record
            .last_applied
            .insert(operation_id.local_session_id(), operation_id.sequence_number());
        self.log_index = log_index;
        Ok(())
    }
}

/// Durable session tracker.
pub struct SessionTracker {
    storage: Box<dyn StateStorage<GlobalSessionTrackerState>>,
    state: RwLock<GlobalSessionTrackerState>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracker").finish_non_exhaustive()
    }
}

impl SessionTracker {
    /// Load persisted state, starting empty if nothing was ever persisted.
    pub fn recover(
        storage: Box<dyn StateStorage<GlobalSessionTrackerState>>,
    ) -> ReplicationResult<Self> {
        let state = storage.load()?.unwrap_or_default();

        log_event(
            Event::SessionStateRecovered,
            &[
                ("log_index", &state.log_index().to_string()),
                ("sessions", &state.sessions().len().to_string()),
            ],
        );

        Ok(Self {
            storage,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    pub fn validate_operation(
        &self,
        global_session: &GlobalSession,
        operation_id: &LocalOperationId,
    ) -> OperationValidation {
        self.read_state()
            .validate_operation(global_session, operation_id)
    }

    /// Record `operation_id` as applied at `log_index`, durably.
    ///
    /// Returns `Ok(false)` without touching state when `log_index` was already
    /// covered (replay). Fails, without mutating anything, when the operation
    /// is not the immediate successor in its session or the persist fails.
    pub fn update(
        &self,
        global_session: &GlobalSession,
        operation_id: &LocalOperationId,
        log_index: i64,
    ) -> ReplicationResult<bool> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = {
            let current = self.read_state();
            if log_index <= current.log_index() {
                return Ok(false);
            }
            current.clone()
        };
        next.record(global_session, operation_id, log_index)?;

        self.storage.persist(&next)?;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(true)
    }

    /// Record `log_index` as processed without applying anything, for a
    /// duplicate entry. Returns `Ok(false)` when it was already covered.
    pub fn advance_log_index(&self, log_index: i64) -> ReplicationResult<bool> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = {
            let current = self.read_state();
            if log_index <= current.log_index() {
                return Ok(false);
            }
            current.clone()
        };
        next.log_index = log_index;

        self.storage.persist(&next)?;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(true)
    }

    /// Log index of the last processed entry, applied or duplicate.
    pub fn last_applied_index(&self) -> i64 {
        self.read_state().log_index()
    }

    pub fn last_applied_sequence_number(&self, session_id: Uuid, local_session_id: i64) -> i64 {
        self.read_state()
            .last_applied_sequence_number(session_id, local_session_id)
    }

    /// Copy of the current state, for state transfer.
    pub fn snapshot(&self) -> GlobalSessionTrackerState {
        self.read_state().clone()
    }

    /// Replace the tracked state with one received from a peer.
    pub fn install_snapshot(&self, snapshot: GlobalSessionTrackerState) -> ReplicationResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.persist(&snapshot)?;

        log_event(
            Event::SessionSnapshotInstalled,
            &[("log_index", &snapshot.log_index().to_string())],
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, GlobalSessionTrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
