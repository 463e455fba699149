//! aerodb-replicator - exactly-once command replication
//!
//! Wraps client commands in session-sequenced operations, drives them through
//! an external consensus engine with backoff and backpressure, and applies
//! each committed operation exactly once.

pub mod cli;
pub mod observability;
pub mod progress;
pub mod replication;
pub mod sequence;
pub mod session;
pub mod state;
