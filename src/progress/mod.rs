//! Progress tracking
//!
//! Correlates an in-flight operation with its eventual outcome. The
//! replicator registers and awaits; the applier commits and resolves.

mod progress;
mod tracker;

pub use progress::{Progress, ReplicationWait};
pub use tracker::ProgressTracker;
