//! Replication Error Types
//!
//! - Transient errors (no leader, submit failure) are retried internally and
//!   never reach a caller
//! - Session gaps and persistence failures are fatal: the applier halts
//! - Aborts and deadline expiry leave the command's durability unknown

use std::fmt;

use crate::state::StorageError;

/// Replication error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationError {
    /// Error kind
    pub kind: ReplicationErrorKind,
    /// Error message
    pub message: String,
}

/// Replication error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Consensus engine is not (or does not know) the leader
    NotLeader,

    /// Submission to the consensus engine failed in transport
    SubmissionFailed,

    /// Availability guard tripped while the operation was outstanding
    Unavailable,

    /// Caller's maximum wait elapsed before resolution
    DeadlineExceeded,

    /// Outstanding-bytes limit rejected the command
    CapacityExceeded,

    /// An operation skipped ahead of its session's sequence
    SessionGap,

    /// An operation id was registered twice
    AlreadyTracked,

    /// The state machine applied the command and reported a failure
    CommandFailed,

    /// Durable session state could not be read or written
    Storage,

    /// The applier stopped after a fatal error
    Halted,

    /// Invalid configuration
    Configuration,
}

impl ReplicationErrorKind {
    /// Stable code string for logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLeader => "REPL_NOT_LEADER",
            Self::SubmissionFailed => "REPL_SUBMISSION_FAILED",
            Self::Unavailable => "REPL_UNAVAILABLE",
            Self::DeadlineExceeded => "REPL_DEADLINE_EXCEEDED",
            Self::CapacityExceeded => "REPL_CAPACITY_EXCEEDED",
            Self::SessionGap => "REPL_SESSION_GAP",
            Self::AlreadyTracked => "REPL_ALREADY_TRACKED",
            Self::CommandFailed => "REPL_COMMAND_FAILED",
            Self::Storage => "REPL_STORAGE",
            Self::Halted => "REPL_HALTED",
            Self::Configuration => "REPL_CONFIGURATION",
        }
    }
}

impl ReplicationError {
    /// Create a new replication error.
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_leader(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::NotLeader, message)
    }

    pub fn submission_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::SubmissionFailed, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::DeadlineExceeded, message)
    }

    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::CapacityExceeded, message)
    }

    pub fn session_gap(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::SessionGap, message)
    }

    pub fn already_tracked(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::AlreadyTracked, message)
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::CommandFailed, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Storage, message)
    }

    pub fn halted(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Halted, message)
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Configuration, message)
    }

    /// Requires operator intervention; no local repair is possible.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::SessionGap
                | ReplicationErrorKind::Storage
                | ReplicationErrorKind::Halted
        )
    }

    /// Handled by backoff-and-resubmit inside the replicator.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::NotLeader | ReplicationErrorKind::SubmissionFailed
        )
    }

    /// The command's fate is known: it was applied (and failed), or it was
    /// rejected before a sequence number was spent on it.
    pub fn is_definite(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::CommandFailed
                | ReplicationErrorKind::CapacityExceeded
                | ReplicationErrorKind::Configuration
        )
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ReplicationError {}

impl From<StorageError> for ReplicationError {
    fn from(e: StorageError) -> Self {
        Self::storage(e.to_string())
    }
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;
