//! Replicator
//!
//! Drives one command from submission to resolution:
//!
//! 1. Reserve outstanding bytes (block or reject)
//! 2. Take a local session and its next operation id
//! 3. Register the operation with the progress tracker
//! 4. Submit until committed: constant backoff while there is no leader,
//!    exponential backoff while a commit notification is overdue
//! 5. Await the result the applier sets
//!
//! Every resubmission carries the same operation id; the session tracker on
//! the apply side turns re-deliveries into duplicates. Bytes are reserved
//! before an operation id is issued, so a rejection never leaves a hole in a
//! local session's sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::availability::AvailabilityGuard;
use super::consensus::{ConsensusEngine, SubmitOutcome};
use super::errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
use super::operation::{Command, CommandOutcome, DistributedOperation};
use super::throttle::Throttle;
use super::timeout::TimeoutStrategy;
use crate::observability::{log_event, Event, ReplicationMetrics};
use crate::progress::{Progress, ProgressTracker, ReplicationWait};
use crate::session::{LocalSessionPool, MemberId};

/// Client-facing entry point of the replication layer.
pub struct Replicator {
    me: MemberId,
    consensus: Arc<dyn ConsensusEngine>,
    session_pool: Arc<LocalSessionPool>,
    progress_tracker: Arc<ProgressTracker>,
    progress_retry: Box<dyn TimeoutStrategy>,
    leader_retry: Box<dyn TimeoutStrategy>,
    guard: Arc<AvailabilityGuard>,
    throttle: Arc<Throttle>,
    max_wait: Option<Duration>,
    metrics: Arc<ReplicationMetrics>,
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("me", &self.me)
            .field("progress_retry", &self.progress_retry)
            .field("leader_retry", &self.leader_retry)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl Replicator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        me: MemberId,
        consensus: Arc<dyn ConsensusEngine>,
        session_pool: Arc<LocalSessionPool>,
        progress_tracker: Arc<ProgressTracker>,
        progress_retry: Box<dyn TimeoutStrategy>,
        leader_retry: Box<dyn TimeoutStrategy>,
        guard: Arc<AvailabilityGuard>,
        throttle: Arc<Throttle>,
        max_wait: Option<Duration>,
        metrics: Arc<ReplicationMetrics>,
    ) -> Self {
        Self {
            me,
            consensus,
            session_pool,
            progress_tracker,
            progress_retry,
            leader_retry,
            guard,
            throttle,
            max_wait,
            metrics,
        }
    }

    /// Replicate `command` and block until it is applied exactly once.
    ///
    /// Errors other than `CommandFailed` and `CapacityExceeded` leave the
    /// command's durability unknown: it may still be applied later.
    pub fn replicate(&self, command: Command) -> ReplicationResult<CommandOutcome> {
        self.metrics.increment_started();
        let deadline = self
            .max_wait
            .and_then(|wait| Instant::now().checked_add(wait));

        let result = self.replicate_until(command, deadline);
        self.record_outcome(&result);
        result
    }

    /// Wake every in-flight operation so it is resent to the new leader now
    /// rather than after its backoff.
    pub fn on_leader_switch(&self, leader: Option<MemberId>) {
        let leader = leader.map_or_else(|| "unknown".to_string(), |m| m.to_string());
        log_event(
            Event::LeaderSwitch,
            &[
                ("member", &self.me.to_string()),
                ("leader", &leader),
                (
                    "in_flight",
                    &self.progress_tracker.in_progress_count().to_string(),
                ),
            ],
        );
        self.progress_tracker.trigger_replication_event();
    }

    fn replicate_until(
        &self,
        command: Command,
        deadline: Option<Instant>,
    ) -> ReplicationResult<CommandOutcome> {
        self.guard.require_available()?;
        let _permit = self.throttle.acquire(command.size(), &self.guard, deadline)?;

        let mut session = self.session_pool.acquire_session();
        let operation = DistributedOperation::new(
            self.session_pool.global_session(),
            session.next_operation_id(),
            command,
        );
        let progress = self.progress_tracker.track_replication(&operation)?;

        let result = self.drive(&operation, &progress, deadline);

        // Without a definite outcome the operation may still be applied
        // later; the session must never issue its successor.
        if result.as_ref().map_or_else(ReplicationError::is_definite, |_| true) {
            self.session_pool.release_session(session);
        }
        result
    }

    fn drive(
        &self,
        operation: &DistributedOperation,
        progress: &Progress,
        deadline: Option<Instant>,
    ) -> ReplicationResult<CommandOutcome> {
        let operation_id = operation.id().to_string();
        let mut progress_attempt: u32 = 0;
        let mut leader_attempt: u32 = 0;

        loop {
            if let Err(e) = self.guard.require_available() {
                return self.abandon(progress, e);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return self.abandon(progress, deadline_error());
            }

            self.metrics.increment_attempts();
            let backoff = match self.submit(operation) {
                Ok(()) => {
                    let timeout = bounded(
                        self.progress_retry.next_timeout_after(progress_attempt),
                        deadline,
                    );
                    match progress.await_replication(timeout) {
                        ReplicationWait::Committed => break,
                        ReplicationWait::ReplicationEvent => continue,
                        ReplicationWait::TimedOut => {
                            if deadline.is_some_and(|d| Instant::now() >= d) {
                                continue;
                            }
                            self.metrics.increment_progress_timeout_retries();
                            log_event(
                                Event::ReplicationProgressTimeout,
                                &[
                                    ("operation", &operation_id),
                                    ("attempt", &progress_attempt.to_string()),
                                    ("waited_ms", &timeout.as_millis().to_string()),
                                ],
                            );
                            progress_attempt = progress_attempt.saturating_add(1);
                            continue;
                        }
                    }
                }
                Err(e) if e.is_retriable() => {
                    let event = if e.kind == ReplicationErrorKind::NotLeader {
                        self.metrics.increment_not_leader_retries();
                        Event::ReplicationNotLeader
                    } else {
                        Event::ReplicationSubmitFailed
                    };
                    log_event(
                        event,
                        &[
                            ("operation", &operation_id),
                            ("attempt", &leader_attempt.to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                    self.leader_retry.next_timeout_after(leader_attempt)
                }
                Err(e) => return self.abandon(progress, e),
            };

            leader_attempt = leader_attempt.saturating_add(1);
            if let Err(e) = self.guard.sleep(bounded(backoff, deadline)) {
                return self.abandon(progress, e);
            }
        }

        match progress.await_result(deadline) {
            Some(result) => result,
            None => self.abandon(progress, deadline_error()),
        }
    }

    /// Submit once. Every failure is a retriable `NotLeader` or
    /// `SubmissionFailed`.
    fn submit(&self, operation: &DistributedOperation) -> ReplicationResult<()> {
        match self.consensus.submit(operation) {
            Ok(SubmitOutcome::Accepted) => Ok(()),
            Ok(SubmitOutcome::NotLeader { leader }) => {
                let leader = leader.map_or_else(|| "unknown".to_string(), |m| m.to_string());
                Err(ReplicationError::not_leader(format!(
                    "submission refused, leader is {}",
                    leader
                )))
            }
            Err(e) => Err(ReplicationError::submission_failed(e.to_string())),
        }
    }

    /// Stop waiting for `progress`. A result the applier set first wins.
    fn abandon(
        &self,
        progress: &Progress,
        error: ReplicationError,
    ) -> ReplicationResult<CommandOutcome> {
        self.progress_tracker
            .abort(&progress.operation_id(), error.clone());
        progress.result().unwrap_or(Err(error))
    }

    fn record_outcome(&self, result: &ReplicationResult<CommandOutcome>) {
        let error = match result {
            Ok(_) => {
                self.metrics.increment_succeeded();
                return;
            }
            Err(e) => e,
        };

        let reason = error.to_string();
        match error.kind {
            ReplicationErrorKind::CapacityExceeded => {
                self.metrics.increment_rejected();
                log_event(Event::ReplicationRejected, &[("reason", &reason)]);
            }
            ReplicationErrorKind::Unavailable => {
                self.metrics.increment_aborted();
                log_event(Event::ReplicationAborted, &[("reason", &reason)]);
            }
            ReplicationErrorKind::DeadlineExceeded => {
                self.metrics.increment_aborted();
                log_event(Event::ReplicationDeadlineExceeded, &[("reason", &reason)]);
            }
            _ => self.metrics.increment_failed(),
        }
    }
}

fn bounded(timeout: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
        None => timeout,
    }
}

fn deadline_error() -> ReplicationError {
    ReplicationError::deadline_exceeded("maximum wait elapsed before the command was resolved")
}
