//! Out-of-order sequence
//!
//! To the outside there is one "highest gap-free number" that never moves
//! backwards. Many threads may report numbers as done in any order; the
//! visible number only advances once every number below the new value has
//! been offered, and then possibly by more than one step at a time.
//!
//! Numbers above a gap wait in a side buffer until the gap closes; each offer
//! that closes a gap folds every now-contiguous buffered number in one pass.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors from waiting on an [`OutOfOrderSequence`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// The awaited number was not reached within the timeout
    #[error("timed out after {waited:?} awaiting {awaited} (highest gap-free {highest_gap_free})")]
    Timeout {
        awaited: i64,
        highest_gap_free: i64,
        waited: Duration,
    },

    /// The sequence was closed; the awaited number will never be reached here
    #[error("sequence closed while awaiting {awaited} (highest gap-free {highest_gap_free})")]
    Closed { awaited: i64, highest_gap_free: i64 },
}

/// Consistent snapshot of the gap-free number and its meta data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapFreeSnapshot {
    pub number: i64,
    pub meta: Vec<i64>,
}

#[derive(Debug)]
struct SequenceState {
    highest_gap_free: i64,
    highest_gap_free_meta: Vec<i64>,
    highest_ever_seen: i64,
    pending: BTreeMap<i64, Vec<i64>>,
    closed: bool,
}

/// Gap-free watermark over numbers completed out of order.
#[derive(Debug)]
pub struct OutOfOrderSequence {
    state: Mutex<SequenceState>,
    advanced: Condvar,
}

impl OutOfOrderSequence {
    /// Sequence whose gap-free number starts at `initial`.
    pub fn new(initial: i64, initial_meta: Vec<i64>) -> Self {
        Self {
            state: Mutex::new(SequenceState {
                highest_gap_free: initial,
                highest_gap_free_meta: initial_meta,
                highest_ever_seen: initial,
                pending: BTreeMap::new(),
                closed: false,
            }),
            advanced: Condvar::new(),
        }
    }

    /// Report `number` as done.
    ///
    /// Returns `true` if the highest gap-free number changed as part of this
    /// call. Numbers at or below the gap-free number are ignored.
    pub fn offer(&self, number: i64, meta: Vec<i64>) -> bool {
        let mut state = self.lock();
        if number > state.highest_ever_seen {
            state.highest_ever_seen = number;
        }

        if number <= state.highest_gap_free {
            return false;
        }
        if number != state.highest_gap_free + 1 {
            state.pending.insert(number, meta);
            return false;
        }

        state.highest_gap_free = number;
        state.highest_gap_free_meta = meta;
        loop {
            let next = state.highest_gap_free + 1;
            match state.pending.remove(&next) {
                Some(next_meta) => {
                    state.highest_gap_free = next;
                    state.highest_gap_free_meta = next_meta;
                }
                None => break,
            }
        }
        drop(state);

        self.advanced.notify_all();
        true
    }

    /// Highest gap-free number with its meta data.
    pub fn get(&self) -> GapFreeSnapshot {
        let state = self.lock();
        GapFreeSnapshot {
            number: state.highest_gap_free,
            meta: state.highest_gap_free_meta.clone(),
        }
    }

    /// Highest gap-free number, without its meta data.
    pub fn highest_gap_free_number(&self) -> i64 {
        self.lock().highest_gap_free
    }

    /// Highest number ever offered, regardless of gaps.
    pub fn highest_ever_seen(&self) -> i64 {
        self.lock().highest_ever_seen
    }

    /// Numbers offered above a gap and not yet folded in.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Block until the gap-free number reaches `awaited` or `timeout` elapses.
    pub fn await_number(&self, awaited: i64, timeout: Duration) -> Result<(), SequenceError> {
        let start = Instant::now();
        // None: the timeout is too large to represent, wait without one
        let deadline = start.checked_add(timeout);
        let mut state = self.lock();

        loop {
            if state.highest_gap_free >= awaited {
                return Ok(());
            }
            if state.closed {
                return Err(SequenceError::Closed {
                    awaited,
                    highest_gap_free: state.highest_gap_free,
                });
            }

            state = match deadline {
                None => self
                    .advanced
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SequenceError::Timeout {
                            awaited,
                            highest_gap_free: state.highest_gap_free,
                            waited: now - start,
                        });
                    }
                    self.advanced
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Overwrite the gap-free number and drop all pending numbers.
    ///
    /// Recovery only: reinitializes from persisted state.
    pub fn set(&self, number: i64, meta: Vec<i64>) {
        let mut state = self.lock();
        state.highest_gap_free = number;
        state.highest_gap_free_meta = meta;
        state.highest_ever_seen = number;
        state.pending.clear();
        drop(state);

        self.advanced.notify_all();
    }

    /// Fail every current and future wait that is not already satisfied.
    pub fn close(&self) {
        self.lock().closed = true;
        self.advanced.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
