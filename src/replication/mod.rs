//! Replication Subsystem
//!
//! Exactly-once command replication on top of an external consensus engine:
//! - Commands are wrapped in operations identified by
//!   `(global session, local session, sequence number)`
//! - The replicator resubmits the same operation until it is committed
//! - The applier applies each operation id at most once
//! - An availability guard aborts everything outstanding on shutdown
//!
//! Consensus itself (elections, log matching, quorum commit) is out of
//! scope; it sits behind [`ConsensusEngine`].

mod applier;
mod availability;
mod config;
mod consensus;
mod errors;
mod loopback;
mod module;
mod operation;
mod replicator;
mod throttle;
mod timeout;

pub use applier::{CommandApplier, StateMachine};
pub use availability::AvailabilityGuard;
pub use config::{ReplicationConfig, DEFAULT_TOTAL_SIZE_LIMIT_BYTES};
pub use consensus::{CommittedEntry, ConsensusEngine, ConsensusError, SubmitOutcome};
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
pub use loopback::{FaultPlan, LoopbackConsensus};
pub use module::ReplicationModule;
pub use operation::{Command, CommandOutcome, DistributedOperation, DistributedOperationId};
pub use replicator::Replicator;
pub use throttle::{Throttle, ThrottlePermit, ThrottlePolicy};
pub use timeout::{
    ConstantTimeoutStrategy, ExponentialBackoffStrategy, RetryStrategyConfig, TimeoutStrategy,
};
