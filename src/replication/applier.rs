//! Command applier
//!
//! The single consumer of the commit stream. For each committed entry, in
//! log order:
//!
//! 1. Mark the operation committed so its submitter stops resubmitting
//! 2. Classify it against the session tracker
//! 3. First application: apply to the state machine, persist the session
//!    state, then resolve the caller
//! 4. Duplicate: resolve the caller without re-executing
//! 5. Gap: halt
//! 6. Publish the entry's log index on the applied sequence
//!
//! A session gap or a failed session persist halts the applier: it trips the
//! availability guard so no caller waits for a result that will never come,
//! and refuses every later entry.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use super::availability::AvailabilityGuard;
use super::consensus::CommittedEntry;
use super::errors::{ReplicationError, ReplicationResult};
use super::operation::{Command, CommandOutcome, DistributedOperationId};
use crate::observability::{log_event, Event, ReplicationMetrics};
use crate::progress::ProgressTracker;
use crate::sequence::{GapFreeSnapshot, OutOfOrderSequence};
use crate::session::{OperationValidation, SessionTracker};

/// The replicated state machine.
pub trait StateMachine: Send {
    /// Execute `command`, committed at `log_index`. An `Err` is a definite
    /// outcome: the command counts as applied and is not retried.
    fn apply(&mut self, command: &Command, log_index: i64) -> Result<Vec<u8>, String>;
}

/// Applies committed entries to a [`StateMachine`] exactly once per
/// operation id.
pub struct CommandApplier<M: StateMachine> {
    state_machine: M,
    session_tracker: Arc<SessionTracker>,
    progress_tracker: Arc<ProgressTracker>,
    applied: Arc<OutOfOrderSequence>,
    guard: Arc<AvailabilityGuard>,
    metrics: Arc<ReplicationMetrics>,
    halted: Option<ReplicationError>,
}

impl<M: StateMachine> CommandApplier<M> {
    pub(crate) fn new(
        state_machine: M,
        session_tracker: Arc<SessionTracker>,
        progress_tracker: Arc<ProgressTracker>,
        applied: Arc<OutOfOrderSequence>,
        guard: Arc<AvailabilityGuard>,
        metrics: Arc<ReplicationMetrics>,
    ) -> Self {
        Self {
            state_machine,
            session_tracker,
            progress_tracker,
            applied,
            guard,
            metrics,
            halted: None,
        }
    }

    /// Apply one committed entry.
    pub fn apply(&mut self, entry: CommittedEntry) -> ReplicationResult<()> {
        if let Some(cause) = &self.halted {
            return Err(ReplicationError::halted(format!(
                "applier halted: {}",
                cause
            )));
        }

        // Replayed after restart; already reflected in the session state.
        if entry.log_index <= self.session_tracker.last_applied_index() {
            return Ok(());
        }

        let operation = &entry.operation;
        let id = operation.id();
        self.progress_tracker.track_commit(&id);

        match self
            .session_tracker
            .validate_operation(operation.global_session(), operation.operation_id())
        {
            OperationValidation::FirstApplication => {
                let result = self
                    .state_machine
                    .apply(operation.command(), entry.log_index)
                    .map(|output| CommandOutcome::Applied {
                        log_index: entry.log_index,
                        output,
                    })
                    .map_err(ReplicationError::command_failed);

                if let Err(e) = self.session_tracker.update(
                    operation.global_session(),
                    operation.operation_id(),
                    entry.log_index,
                ) {
                    return Err(self.halt(&id, Event::SessionPersistFailed, e));
                }

                self.metrics.increment_first_applications();
                log_event(
                    Event::OperationApplied,
                    &[
                        ("operation", &id.to_string()),
                        ("log_index", &entry.log_index.to_string()),
                    ],
                );
                self.progress_tracker.track_result(&id, result);
            }
            OperationValidation::Duplicate { last_applied } => {
                if let Err(e) = self.session_tracker.advance_log_index(entry.log_index) {
                    return Err(self.halt(&id, Event::SessionPersistFailed, e));
                }

                self.metrics.increment_duplicates_suppressed();
                log_event(
                    Event::DuplicateSuppressed,
                    &[
                        ("operation", &id.to_string()),
                        ("last_applied", &last_applied.to_string()),
                        ("log_index", &entry.log_index.to_string()),
                    ],
                );
                self.progress_tracker.track_result(
                    &id,
                    Ok(CommandOutcome::AlreadyApplied {
                        log_index: entry.log_index,
                    }),
                );
            }
            OperationValidation::Gap { last_applied } => {
                self.metrics.increment_session_gaps();
                let error = ReplicationError::session_gap(format!(
                    "operation {} at log index {} skips ahead of last applied sequence number {}",
                    id, entry.log_index, last_applied
                ));
                return Err(self.halt(&id, Event::SessionGap, error));
            }
        }

        self.applied.offer(entry.log_index, vec![entry.term]);
        Ok(())
    }

    /// Apply entries until the stream ends or the applier halts.
    pub fn run(&mut self, commits: Receiver<CommittedEntry>) -> ReplicationResult<()> {
        for entry in commits {
            self.apply(entry)?;
        }
        Ok(())
    }

    /// Highest log index every entry up to which has been processed.
    pub fn last_applied(&self) -> GapFreeSnapshot {
        self.applied.get()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn state_machine(&self) -> &M {
        &self.state_machine
    }

    pub fn into_state_machine(self) -> M {
        self.state_machine
    }

    fn halt(
        &mut self,
        id: &DistributedOperationId,
        event: Event,
        error: ReplicationError,
    ) -> ReplicationError {
        let reason = error.to_string();
        log_event(
            event,
            &[("operation", &id.to_string()), ("error", &reason)],
        );
        log_event(Event::ApplierHalted, &[("error", &reason)]);

        self.progress_tracker.abort(id, error.clone());
        self.halted = Some(error.clone());
        self.guard
            .mark_unavailable(format!("applier halted: {}", reason));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{Command, DistributedOperation, ReplicationErrorKind};
    use crate::session::{GlobalSession, GlobalSessionTrackerState, LocalOperationId, MemberId};
    use crate::state::InMemoryStateStorage;

    #[derive(Default)]
    struct Counter {
        applied: Vec<i64>,
    }

    impl StateMachine for Counter {
        fn apply(&mut self, command: &Command, log_index: i64) -> Result<Vec<u8>, String> {
            if command.payload() == b"fail" {
                return Err("refused".to_string());
            }
            self.applied.push(log_index);
            Ok(self.applied.len().to_string().into_bytes())
        }
    }

    struct Fixture {
        session: GlobalSession,
        storage: Arc<InMemoryStateStorage<GlobalSessionTrackerState>>,
        progress: Arc<ProgressTracker>,
        guard: Arc<AvailabilityGuard>,
        applier: CommandApplier<Counter>,
    }

    fn fixture() -> Fixture {
        let session = GlobalSession::for_owner(MemberId::random());
        let storage: Arc<InMemoryStateStorage<GlobalSessionTrackerState>> =
            Arc::new(InMemoryStateStorage::new());
        let tracker = Arc::new(SessionTracker::recover(Box::new(Arc::clone(&storage))).unwrap());
        let progress = Arc::new(ProgressTracker::new(session));
        let guard = Arc::new(AvailabilityGuard::new());
        let applier = CommandApplier::new(
            Counter::default(),
            tracker,
            Arc::clone(&progress),
            Arc::new(OutOfOrderSequence::new(-1, vec![])),
            Arc::clone(&guard),
            Arc::new(ReplicationMetrics::new()),
        );
        Fixture {
            session,
            storage,
            progress,
            guard,
            applier,
        }
    }

    fn entry(session: GlobalSession, log_index: i64, seq: i64, payload: &[u8]) -> CommittedEntry {
        CommittedEntry {
            log_index,
            term: 1,
            operation: DistributedOperation::new(
                session,
                LocalOperationId::new(0, seq),
                Command::new(payload.to_vec()),
            ),
        }
    }

    #[test]
    fn test_first_application_resolves_progress() {
        let mut f = fixture();
        let e = entry(f.session, 0, 0, b"x");
        let progress = f.progress.track_replication(&e.operation).unwrap();

        f.applier.apply(e).unwrap();

        assert_eq!(
            progress.result(),
            Some(Ok(CommandOutcome::Applied {
                log_index: 0,
                output: b"1".to_vec()
            }))
        );
        assert_eq!(f.applier.last_applied().number, 0);
        assert_eq!(f.storage.persist_count(), 1);
    }

    #[test]
    fn test_duplicate_is_not_reapplied() {
        let mut f = fixture();
        f.applier.apply(entry(f.session, 0, 0, b"x")).unwrap();

        let retry = entry(f.session, 1, 0, b"x");
        let progress = f.progress.track_replication(&retry.operation).unwrap();
        f.applier.apply(retry).unwrap();

        assert_eq!(f.applier.state_machine().applied, vec![0]);
        assert_eq!(
            progress.result(),
            Some(Ok(CommandOutcome::AlreadyApplied { log_index: 1 }))
        );
        assert_eq!(f.applier.last_applied().number, 1);
        assert_eq!(f.storage.current().unwrap().log_index(), 1);
    }

    #[test]
    fn test_duplicate_persist_failure_halts() {
        let mut f = fixture();
        f.applier.apply(entry(f.session, 0, 0, b"x")).unwrap();
        f.storage.fail_next_persists(1);

        let err = f.applier.apply(entry(f.session, 1, 0, b"x")).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Storage);
        assert!(f.applier.is_halted());
        assert_eq!(f.applier.last_applied().number, 0);
    }

    #[test]
    fn test_state_machine_failure_is_definite() {
        let mut f = fixture();
        let e = entry(f.session, 0, 0, b"fail");
        let progress = f.progress.track_replication(&e.operation).unwrap();

        f.applier.apply(e).unwrap();

        let err = progress.result().unwrap().unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::CommandFailed);
        assert!(!f.applier.is_halted());
    }

    #[test]
    fn test_gap_halts_applier_and_trips_guard() {
        let mut f = fixture();
        let e = entry(f.session, 0, 2, b"x");
        let progress = f.progress.track_replication(&e.operation).unwrap();

        let err = f.applier.apply(e).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::SessionGap);
        assert!(f.applier.is_halted());
        assert!(!f.guard.is_available());
        assert!(progress.is_resolved());

        let next = f.applier.apply(entry(f.session, 1, 0, b"x")).unwrap_err();
        assert_eq!(next.kind, ReplicationErrorKind::Halted);
        assert!(f.applier.state_machine().applied.is_empty());
    }

    #[test]
    fn test_persist_failure_halts_applier() {
        let mut f = fixture();
        f.storage.fail_next_persists(1);

        let err = f.applier.apply(entry(f.session, 0, 0, b"x")).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Storage);
        assert!(f.applier.is_halted());
    }

    #[test]
    fn test_replayed_entries_are_skipped() {
        let mut f = fixture();
        f.applier.apply(entry(f.session, 0, 0, b"x")).unwrap();
        f.applier.apply(entry(f.session, 0, 0, b"x")).unwrap();

        assert_eq!(f.applier.state_machine().applied, vec![0]);
        assert_eq!(f.storage.persist_count(), 1);
    }

    #[test]
    fn test_peer_operations_apply_without_local_progress() {
        let mut f = fixture();
        let peer = GlobalSession::for_owner(MemberId::random());
        f.applier.apply(entry(peer, 0, 0, b"x")).unwrap();

        assert_eq!(f.applier.state_machine().applied, vec![0]);
        assert_eq!(f.progress.in_progress_count(), 0);
    }
}
