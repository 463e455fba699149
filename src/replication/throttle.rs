//! Outstanding-bytes throttle
//!
//! Bounds the total payload size of unresolved operations. A permit holds
//! its bytes until dropped.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::availability::AvailabilityGuard;
use super::errors::{ReplicationError, ReplicationResult};

/// What to do when a command does not fit under the limit right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Wait until enough outstanding bytes drain.
    #[default]
    Block,
    /// Fail immediately with `CapacityExceeded`.
    Reject,
}

#[derive(Debug, Default)]
struct ThrottleState {
    outstanding: u64,
    closed: bool,
}

/// Outstanding-bytes limiter shared by all callers of one module.
#[derive(Debug)]
pub struct Throttle {
    limit: u64,
    policy: ThrottlePolicy,
    state: Mutex<ThrottleState>,
    drained: Condvar,
}

/// Bytes reserved for one operation; released on drop.
#[derive(Debug)]
pub struct ThrottlePermit<'a> {
    throttle: &'a Throttle,
    size: u64,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.throttle.release(self.size);
    }
}

impl Throttle {
    pub fn new(limit: u64, policy: ThrottlePolicy) -> Self {
        Self {
            limit,
            policy,
            state: Mutex::new(ThrottleState::default()),
            drained: Condvar::new(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Reserve `size` bytes.
    ///
    /// A command larger than the whole limit is rejected outright. Under
    /// [`ThrottlePolicy::Block`] the wait ends with `Unavailable` when the
    /// guard trips or the throttle closes, and with `DeadlineExceeded` at
    /// `deadline`.
    pub fn acquire(
        &self,
        size: u64,
        guard: &AvailabilityGuard,
        deadline: Option<Instant>,
    ) -> ReplicationResult<ThrottlePermit<'_>> {
        if size > self.limit {
            return Err(ReplicationError::capacity_exceeded(format!(
                "command of {} bytes exceeds the outstanding limit of {} bytes",
                size, self.limit
            )));
        }

        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(ReplicationError::unavailable("throttle closed"));
            }
            guard.require_available()?;

            if state.outstanding + size <= self.limit {
                state.outstanding += size;
                return Ok(ThrottlePermit {
                    throttle: self,
                    size,
                });
            }

            if self.policy == ThrottlePolicy::Reject {
                return Err(ReplicationError::capacity_exceeded(format!(
                    "{} bytes outstanding, {} more would exceed the limit of {} bytes",
                    state.outstanding, size, self.limit
                )));
            }

            state = match deadline {
                None => self
                    .drained
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ReplicationError::deadline_exceeded(
                            "timed out waiting for outstanding bytes to drain",
                        ));
                    }
                    self.drained
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Fail current and future blocked acquires.
    pub fn close(&self) {
        self.lock().closed = true;
        self.drained.notify_all();
    }

    /// Bytes currently reserved.
    pub fn outstanding(&self) -> u64 {
        self.lock().outstanding
    }

    fn release(&self, size: u64) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(size);
        drop(state);
        self.drained.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
