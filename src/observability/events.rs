//! Observable replication events
//!
//! Every log line the replication layer writes names one of these events.

use std::fmt;

use super::logger::Severity;

/// Observable events of the replication layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Replication module wired and serving
    ServiceStarted,
    /// Availability guard tripped; outstanding work is being aborted
    ServiceUnavailable,
    /// Session tracker state loaded from durable storage
    SessionStateRecovered,
    /// Session tracker snapshot installed
    SessionSnapshotInstalled,

    // Replicator
    /// Command rejected by backpressure or size limit
    ReplicationRejected,
    /// Submission answered "not leader" / "leader unknown"
    ReplicationNotLeader,
    /// Submission failed in transport
    ReplicationSubmitFailed,
    /// No commit notification within the progress timeout; resubmitting
    ReplicationProgressTimeout,
    /// Outstanding operation aborted (availability loss)
    ReplicationAborted,
    /// Caller's maximum wait elapsed
    ReplicationDeadlineExceeded,
    /// Leader changed; in-flight operations are resent
    LeaderSwitch,

    // Applier
    /// Operation applied for the first time
    OperationApplied,
    /// Operation was a duplicate and was not re-executed
    DuplicateSuppressed,
    /// Operation sequence skipped ahead of its session (FATAL)
    SessionGap,
    /// Session state could not be persisted (FATAL)
    SessionPersistFailed,
    /// Applier refuses further entries after a fatal error
    ApplierHalted,

    // Progress
    /// A second resolution for the same operation was ignored
    DoubleResolution,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ServiceStarted => "REPLICATION_SERVICE_STARTED",
            Event::ServiceUnavailable => "REPLICATION_SERVICE_UNAVAILABLE",
            Event::SessionStateRecovered => "SESSION_STATE_RECOVERED",
            Event::SessionSnapshotInstalled => "SESSION_SNAPSHOT_INSTALLED",

            Event::ReplicationRejected => "REPLICATION_REJECTED",
            Event::ReplicationNotLeader => "REPLICATION_NOT_LEADER",
            Event::ReplicationSubmitFailed => "REPLICATION_SUBMIT_FAILED",
            Event::ReplicationProgressTimeout => "REPLICATION_PROGRESS_TIMEOUT",
            Event::ReplicationAborted => "REPLICATION_ABORTED",
            Event::ReplicationDeadlineExceeded => "REPLICATION_DEADLINE_EXCEEDED",
            Event::LeaderSwitch => "LEADER_SWITCH",

            Event::OperationApplied => "OPERATION_APPLIED",
            Event::DuplicateSuppressed => "DUPLICATE_SUPPRESSED",
            Event::SessionGap => "SESSION_GAP",
            Event::SessionPersistFailed => "SESSION_PERSIST_FAILED",
            Event::ApplierHalted => "APPLIER_HALTED",

            Event::DoubleResolution => "PROGRESS_DOUBLE_RESOLUTION",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::OperationApplied | Event::DuplicateSuppressed => Severity::Trace,
            Event::ServiceStarted
            | Event::SessionStateRecovered
            | Event::SessionSnapshotInstalled
            | Event::LeaderSwitch => Severity::Info,
            Event::ReplicationRejected
            | Event::ReplicationNotLeader
            | Event::ReplicationSubmitFailed
            | Event::ReplicationProgressTimeout
            | Event::ServiceUnavailable
            | Event::DoubleResolution => Severity::Warn,
            Event::ReplicationAborted | Event::ReplicationDeadlineExceeded => Severity::Error,
            Event::SessionGap | Event::SessionPersistFailed | Event::ApplierHalted => {
                Severity::Fatal
            }
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Event; 17] = [
        Event::ServiceStarted,
        Event::ServiceUnavailable,
        Event::SessionStateRecovered,
        Event::SessionSnapshotInstalled,
        Event::ReplicationRejected,
        Event::ReplicationNotLeader,
        Event::ReplicationSubmitFailed,
        Event::ReplicationProgressTimeout,
        Event::ReplicationAborted,
        Event::ReplicationDeadlineExceeded,
        Event::LeaderSwitch,
        Event::OperationApplied,
        Event::DuplicateSuppressed,
        Event::SessionGap,
        Event::SessionPersistFailed,
        Event::ApplierHalted,
        Event::DoubleResolution,
    ];

    #[test]
    fn test_event_names_are_upper_snake_case() {
        for event in ALL {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::SessionGap.is_fatal());
        assert!(Event::SessionPersistFailed.is_fatal());
        assert!(Event::ApplierHalted.is_fatal());
        assert!(!Event::ReplicationNotLeader.is_fatal());
        assert!(!Event::ReplicationAborted.is_fatal());
    }
}
