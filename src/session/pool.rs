//! Pool of reusable local sessions
//!
//! - A session handed out by `acquire_session` is owned by that caller alone
//! - Released sessions keep their counters and are reused LIFO
//! - Session ids are never reused within one pool

use std::sync::{Mutex, PoisonError};

use super::identity::GlobalSession;
use super::local::LocalSession;

#[derive(Debug)]
struct PoolInner {
    next_session_id: i64,
    idle: Vec<LocalSession>,
}

/// Local sessions scoped under one global session.
#[derive(Debug)]
pub struct LocalSessionPool {
    global_session: GlobalSession,
    inner: Mutex<PoolInner>,
}

impl LocalSessionPool {
    pub fn new(global_session: GlobalSession) -> Self {
        Self {
            global_session,
            inner: Mutex::new(PoolInner {
                next_session_id: 0,
                idle: Vec::new(),
            }),
        }
    }

    pub fn global_session(&self) -> GlobalSession {
        self.global_session
    }

    /// Take an idle session, or open a new one if none is idle.
    pub fn acquire_session(&self) -> LocalSession {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.idle.pop() {
            Some(session) => session,
            None => {
                let id = inner.next_session_id;
                inner.next_session_id += 1;
                LocalSession::new(id)
            }
        }
    }

    /// Return a session whose last operation reached a definite outcome.
    ///
    /// A session whose operation outcome is unknown must be dropped instead:
    /// reusing it could get a later sequence number applied before the
    /// unresolved one.
    pub fn release_session(&self, session: LocalSession) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            !inner
                .idle
                .iter()
                .any(|s| s.local_session_id() == session.local_session_id()),
            "local session released twice"
        );
        inner.idle.push(session);
    }

    /// Number of sessions ever opened by this pool.
    pub fn open_session_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_session_id as usize
    }

    /// Number of sessions currently idle.
    pub fn idle_session_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemberId;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn pool() -> LocalSessionPool {
        LocalSessionPool::new(GlobalSession::for_owner(MemberId::random()))
    }

    #[test]
    fn test_acquire_opens_new_session_when_none_idle() {
        let pool = pool();
        let a = pool.acquire_session();
        let b = pool.acquire_session();

        assert_ne!(a.local_session_id(), b.local_session_id());
        assert_eq!(pool.open_session_count(), 2);
    }

    #[test]
    fn test_released_session_is_reused_with_its_counter() {
        let pool = pool();
        let mut session = pool.acquire_session();
        let id = session.local_session_id();
        session.next_operation_id();
        session.next_operation_id();
        pool.release_session(session);

        let mut reused = pool.acquire_session();
        assert_eq!(reused.local_session_id(), id);
        assert_eq!(reused.next_operation_id().sequence_number(), 2);
        assert_eq!(pool.open_session_count(), 1);
    }

    #[test]
    fn test_dropped_session_is_never_handed_out_again() {
        let pool = pool();
        let dropped = pool.acquire_session();
        let dropped_id = dropped.local_session_id();
        drop(dropped);

        let next = pool.acquire_session();
        assert_ne!(next.local_session_id(), dropped_id);
    }

    #[test]
    fn test_concurrent_holders_never_share_a_session() {
        let pool = Arc::new(pool());
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let session = pool.acquire_session();
                    let id = session.local_session_id();
                    // hold until every thread owns one
                    barrier.wait();
                    pool.release_session(session);
                    id
                })
            })
            .collect();

        let ids: HashSet<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), threads);
        assert_eq!(pool.idle_session_count(), threads);
    }
}
