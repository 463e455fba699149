//! Loopback consensus
//!
//! Single-member, in-process stand-in for a consensus engine. Every accepted
//! submission is committed at the next log index and delivered on the commit
//! stream. Faults are scripted:
//!
//! - rejected: answered "not leader"
//! - dropped: accepted but never committed (lost by the leader)
//! - duplicated: committed twice (a resubmission that raced its original)

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::consensus::{CommittedEntry, ConsensusEngine, ConsensusError, SubmitOutcome};
use super::operation::DistributedOperation;

/// Periodic faults, applied to every K-th submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub reject_every: Option<u64>,
    pub drop_every: Option<u64>,
    pub duplicate_every: Option<u64>,
}

impl FaultPlan {
    fn hits(every: Option<u64>, submission: u64) -> bool {
        matches!(every, Some(k) if k > 0 && submission % k == 0)
    }
}

#[derive(Debug)]
struct LoopbackState {
    commits: Option<Sender<CommittedEntry>>,
    next_index: i64,
    term: i64,
    submissions: u64,
    committed: u64,
    plan: FaultPlan,
    reject_next: u64,
    drop_next: u64,
    duplicate_next: u64,
}

/// In-process consensus engine for simulations and tests.
#[derive(Debug)]
pub struct LoopbackConsensus {
    state: Mutex<LoopbackState>,
}

impl LoopbackConsensus {
    /// Engine and the receiving end of its commit stream.
    pub fn new() -> (Self, Receiver<CommittedEntry>) {
        Self::with_faults(FaultPlan::default())
    }

    pub fn with_faults(plan: FaultPlan) -> (Self, Receiver<CommittedEntry>) {
        let (tx, rx) = mpsc::channel();
        let engine = Self {
            state: Mutex::new(LoopbackState {
                commits: Some(tx),
                next_index: 0,
                term: 1,
                submissions: 0,
                committed: 0,
                plan,
                reject_next: 0,
                drop_next: 0,
                duplicate_next: 0,
            }),
        };
        (engine, rx)
    }

    /// Answer the next `count` submissions with "not leader".
    pub fn reject_next(&self, count: u64) {
        self.lock().reject_next = count;
    }

    /// Accept but never commit the next `count` submissions.
    pub fn drop_next(&self, count: u64) {
        self.lock().drop_next = count;
    }

    /// Commit each of the next `count` submissions twice.
    pub fn duplicate_next(&self, count: u64) {
        self.lock().duplicate_next = count;
    }

    /// Continue the log after `log_index`, as after a restart.
    pub fn resume_after(&self, log_index: i64) {
        self.lock().next_index = log_index + 1;
    }

    /// Start a new term, as after an election.
    pub fn new_term(&self) -> i64 {
        let mut state = self.lock();
        state.term += 1;
        state.term
    }

    /// Close the commit stream; later submissions fail as unreachable.
    pub fn disconnect(&self) {
        self.lock().commits = None;
    }

    pub fn submissions(&self) -> u64 {
        self.lock().submissions
    }

    /// Entries delivered on the commit stream, duplicates included.
    pub fn committed(&self) -> u64 {
        self.lock().committed
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConsensusEngine for LoopbackConsensus {
    fn submit(&self, operation: &DistributedOperation) -> Result<SubmitOutcome, ConsensusError> {
        let mut state = self.lock();
        state.submissions += 1;
        let submission = state.submissions;

        if state.commits.is_none() {
            return Err(ConsensusError::Unreachable("commit stream closed".to_string()));
        }

        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Ok(SubmitOutcome::NotLeader { leader: None });
        }
        if FaultPlan::hits(state.plan.reject_every, submission) {
            return Ok(SubmitOutcome::NotLeader { leader: None });
        }

        if state.drop_next > 0 {
            state.drop_next -= 1;
            return Ok(SubmitOutcome::Accepted);
        }
        if FaultPlan::hits(state.plan.drop_every, submission) {
            return Ok(SubmitOutcome::Accepted);
        }

        let copies = if state.duplicate_next > 0 {
            state.duplicate_next -= 1;
            2
        } else if FaultPlan::hits(state.plan.duplicate_every, submission) {
            2
        } else {
            1
        };

        for _ in 0..copies {
            let entry = CommittedEntry {
                log_index: state.next_index,
                term: state.term,
                operation: operation.clone(),
            };
            let delivered = state
                .commits
                .as_ref()
                .is_some_and(|commits| commits.send(entry).is_ok());
            if !delivered {
                state.commits = None;
                return Err(ConsensusError::Unreachable("commit stream closed".to_string()));
            }
            state.next_index += 1;
            state.committed += 1;
        }
        Ok(SubmitOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Command;
    use crate::session::{GlobalSession, LocalOperationId, MemberId};

    fn operation() -> DistributedOperation {
        DistributedOperation::new(
            GlobalSession::for_owner(MemberId::random()),
            LocalOperationId::new(0, 0),
            Command::new(b"op".to_vec()),
        )
    }

    #[test]
    fn test_commits_in_log_order() {
        let (engine, commits) = LoopbackConsensus::new();
        engine.submit(&operation()).unwrap();
        engine.submit(&operation()).unwrap();

        let indices: Vec<i64> = commits.try_iter().map(|e| e.log_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_scripted_rejections() {
        let (engine, commits) = LoopbackConsensus::new();
        engine.reject_next(2);

        assert_eq!(
            engine.submit(&operation()).unwrap(),
            SubmitOutcome::NotLeader { leader: None }
        );
        assert_eq!(
            engine.submit(&operation()).unwrap(),
            SubmitOutcome::NotLeader { leader: None }
        );
        assert_eq!(engine.submit(&operation()).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(commits.try_iter().count(), 1);
    }

    #[test]
    fn test_dropped_submission_is_never_committed() {
        let (engine, commits) = LoopbackConsensus::new();
        engine.drop_next(1);

        assert_eq!(engine.submit(&operation()).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(commits.try_iter().count(), 0);
    }

    #[test]
    fn test_duplicated_submission_commits_twice() {
        let (engine, commits) = LoopbackConsensus::with_faults(FaultPlan {
            duplicate_every: Some(1),
            ..FaultPlan::default()
        });
        let op = operation();
        engine.submit(&op).unwrap();

        let entries: Vec<CommittedEntry> = commits.try_iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation.id(), entries[1].operation.id());
        assert_eq!(engine.committed(), 2);
    }

    #[test]
    fn test_disconnect_fails_submissions() {
        let (engine, _commits) = LoopbackConsensus::new();
        engine.disconnect();
        assert!(engine.submit(&operation()).is_err());
    }

    #[test]
    fn test_resume_after_continues_log() {
        let (engine, commits) = LoopbackConsensus::new();
        engine.resume_after(41);
        engine.submit(&operation()).unwrap();
        assert_eq!(commits.recv().unwrap().log_index, 42);
    }

    #[test]
    fn test_new_term_stamps_entries() {
        let (engine, commits) = LoopbackConsensus::new();
        assert_eq!(engine.new_term(), 2);
        engine.submit(&operation()).unwrap();
        assert_eq!(commits.recv().unwrap().term, 2);
    }
}
