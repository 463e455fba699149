//! Replication counters
//!
//! - Counters only, monotonic, reset only on process start
//! - Relaxed atomics; values are exact but not ordered with each other

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one replication module.
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    replications_started: AtomicU64,
    submit_attempts: AtomicU64,
    replications_succeeded: AtomicU64,
    replications_failed: AtomicU64,
    replications_aborted: AtomicU64,
    replications_rejected: AtomicU64,
    not_leader_retries: AtomicU64,
    progress_timeout_retries: AtomicU64,
    first_applications: AtomicU64,
    duplicates_suppressed: AtomicU64,
    session_gaps: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $get:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`")]
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[doc = concat!("Current `", stringify!($field), "`")]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl ReplicationMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_started, started, replications_started);
    counter!(increment_attempts, attempts, submit_attempts);
    counter!(increment_succeeded, succeeded, replications_succeeded);
    counter!(increment_failed, failed, replications_failed);
    counter!(increment_aborted, aborted, replications_aborted);
    counter!(increment_rejected, rejected, replications_rejected);
    counter!(increment_not_leader_retries, not_leader_retries, not_leader_retries);
    counter!(
        increment_progress_timeout_retries,
        progress_timeout_retries,
        progress_timeout_retries
    );
    counter!(increment_first_applications, first_applications, first_applications);
    counter!(
        increment_duplicates_suppressed,
        duplicates_suppressed,
        duplicates_suppressed
    );
    counter!(increment_session_gaps, session_gaps, session_gaps);

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            replications_started: self.started(),
            submit_attempts: self.attempts(),
            replications_succeeded: self.succeeded(),
            replications_failed: self.failed(),
            replications_aborted: self.aborted(),
            replications_rejected: self.rejected(),
            not_leader_retries: self.not_leader_retries(),
            progress_timeout_retries: self.progress_timeout_retries(),
            first_applications: self.first_applications(),
            duplicates_suppressed: self.duplicates_suppressed(),
            session_gaps: self.session_gaps(),
        }
    }
}

/// Serializable copy of [`ReplicationMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub replications_started: u64,
    pub submit_attempts: u64,
    pub replications_succeeded: u64,
    pub replications_failed: u64,
    pub replications_aborted: u64,
    pub replications_rejected: u64,
    pub not_leader_retries: u64,
    pub progress_timeout_retries: u64,
    pub first_applications: u64,
    pub duplicates_suppressed: u64,
    pub session_gaps: u64,
}
