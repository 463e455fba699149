//! Session identity and exactly-once bookkeeping
//!
//! - `GlobalSession`: who issues operations, stable for a module's lifetime
//! - `LocalSession`: a per-operation sequencing context drawn from a pool
//! - `SessionTracker`: durable last-applied sequence per local session, used
//!   to suppress re-application of retried operations

mod identity;
mod local;
mod pool;
mod tracker;

pub use identity::{GlobalSession, MemberId};
pub use local::{LocalOperationId, LocalSession};
pub use pool::LocalSessionPool;
pub use tracker::{
    GlobalSessionRecord, GlobalSessionTrackerState, OperationValidation, SessionTracker,
};

/// Storage key of the session tracker state.
pub const SESSION_TRACKER_NAME: &str = "session-tracker";
