//! Consensus engine seam
//!
//! The replication layer only submits operations and consumes the stream of
//! committed entries. Leader election, log matching and quorum commit live
//! behind [`ConsensusEngine`].

use thiserror::Error;

use super::operation::DistributedOperation;
use crate::session::MemberId;

/// Acknowledgement of a submission. Says nothing about commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to the leader's log; a commit notification may follow.
    Accepted,
    /// This member cannot accept submissions. `leader` is the known leader,
    /// if any.
    NotLeader { leader: Option<MemberId> },
}

/// Transport-level submission failure. Always retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("consensus engine unreachable: {0}")]
    Unreachable(String),

    #[error("submission timed out: {0}")]
    Timeout(String),
}

/// Replicated log as seen by the replication layer.
pub trait ConsensusEngine: Send + Sync {
    fn submit(&self, operation: &DistributedOperation) -> Result<SubmitOutcome, ConsensusError>;
}

/// An operation at its committed position in the log, as delivered to the
/// applier. Delivered in log order, exactly once per committed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEntry {
    pub log_index: i64,
    pub term: i64,
    pub operation: DistributedOperation,
}
