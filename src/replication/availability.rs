//! Availability guard
//!
//! One-way switch from available to unavailable (shutdown or loss of
//! cluster membership). Every blocking wait in the replication layer either
//! sleeps through the guard or registers a listener, so tripping it unblocks
//! all waiters promptly.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::errors::{ReplicationError, ReplicationResult};
use crate::observability::{log_event, Event};

type Listener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct GuardState {
    unavailable: Option<String>,
    listeners: Vec<Listener>,
}

/// Shared availability signal.
#[derive(Default)]
pub struct AvailabilityGuard {
    state: Mutex<GuardState>,
    changed: Condvar,
}

impl std::fmt::Debug for AvailabilityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AvailabilityGuard")
            .field("unavailable", &state.unavailable)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl AvailabilityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.lock().unavailable.is_none()
    }

    /// `Err(Unavailable)` once the guard has tripped.
    pub fn require_available(&self) -> ReplicationResult<()> {
        match &self.lock().unavailable {
            None => Ok(()),
            Some(reason) => Err(ReplicationError::unavailable(reason.clone())),
        }
    }

    /// Trip the guard. Listeners run once, on the first call only.
    pub fn mark_unavailable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let listeners = {
            let mut state = self.lock();
            if state.unavailable.is_some() {
                return;
            }
            state.unavailable = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        self.changed.notify_all();

        log_event(Event::ServiceUnavailable, &[("reason", &reason)]);
        for listener in listeners {
            listener(&reason);
        }
    }

    pub fn shutdown(&self) {
        self.mark_unavailable("replication service shut down");
    }

    /// Sleep for `duration`, waking early with `Err(Unavailable)` if the
    /// guard trips.
    pub fn sleep(&self, duration: Duration) -> ReplicationResult<()> {
        let deadline = Instant::now().checked_add(duration);
        let mut state = self.lock();
        loop {
            if let Some(reason) = &state.unavailable {
                return Err(ReplicationError::unavailable(reason.clone()));
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Run `listener` when the guard trips. Runs immediately if it already
    /// has.
    pub fn on_unavailable(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        let mut state = self.lock();
        match state.unavailable.clone() {
            None => state.listeners.push(Box::new(listener)),
            Some(reason) => {
                drop(state);
                listener(&reason);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::ReplicationErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sleep_completes_while_available() {
        let guard = AvailabilityGuard::new();
        assert!(guard.sleep(Duration::from_millis(5)).is_ok());
        assert!(guard.is_available());
    }

    #[test]
    fn test_shutdown_interrupts_sleep() {
        let guard = Arc::new(AvailabilityGuard::new());
        let sleeper = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let start = Instant::now();
                (guard.sleep(Duration::from_secs(30)), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        guard.shutdown();

        let (result, elapsed) = sleeper.join().unwrap();
        assert_eq!(result.unwrap_err().kind, ReplicationErrorKind::Unavailable);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_listeners_run_once() {
        let guard = AvailabilityGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            guard.on_unavailable(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        guard.mark_unavailable("lost membership");
        guard.shutdown();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(guard
            .require_available()
            .unwrap_err()
            .message
            .contains("lost membership"));
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let guard = AvailabilityGuard::new();
        guard.shutdown();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        guard.on_unavailable(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbounded_sleep_interrupted_by_shutdown() {
        let guard = Arc::new(AvailabilityGuard::new());
        let sleeper = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.sleep(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(10));
        guard.shutdown();
        let err = sleeper.join().unwrap().unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Unavailable);
    }
}
