//! Distributed operations: the unit submitted to consensus

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{GlobalSession, LocalOperationId};

/// Opaque command bytes to replicate and apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(Vec<u8>);

impl Command {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    /// Size counted against the outstanding-bytes limit.
    pub fn size(&self) -> u64 {
        self.0.len() as u64
    }
}

/// Stable identity of one logical write attempt, shared by all its
/// retransmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributedOperationId {
    pub session_id: Uuid,
    pub operation_id: LocalOperationId,
}

impl fmt::Display for DistributedOperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.operation_id)
    }
}

/// A command tagged with the session coordinates that make it idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedOperation {
    global_session: GlobalSession,
    operation_id: LocalOperationId,
    command: Command,
}

impl DistributedOperation {
    pub fn new(global_session: GlobalSession, operation_id: LocalOperationId, command: Command) -> Self {
        Self {
            global_session,
            operation_id,
            command,
        }
    }

    pub fn id(&self) -> DistributedOperationId {
        DistributedOperationId {
            session_id: self.global_session.session_id(),
            operation_id: self.operation_id,
        }
    }

    pub fn global_session(&self) -> &GlobalSession {
        &self.global_session
    }

    pub fn operation_id(&self) -> &LocalOperationId {
        &self.operation_id
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn size(&self) -> u64 {
        self.command.size()
    }
}

/// What a caller of `replicate` gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was applied at `log_index` and produced `output`.
    Applied { log_index: i64, output: Vec<u8> },
    /// The command had already been applied earlier; it was not re-executed.
    AlreadyApplied { log_index: i64 },
}

impl CommandOutcome {
    pub fn log_index(&self) -> i64 {
        match self {
            Self::Applied { log_index, .. } | Self::AlreadyApplied { log_index } => *log_index,
        }
    }
}
