//! Member and global session identity

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Wrap an existing UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Fresh random member identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Stable identity of whoever issues operations.
///
/// Created once per replication module lifetime and never mutated. The
/// session id changes across restarts; the owner does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalSession {
    session_id: Uuid,
    owner: MemberId,
}

impl GlobalSession {
    pub fn new(session_id: Uuid, owner: MemberId) -> Self {
        Self { session_id, owner }
    }

    /// New global session with a random id, owned by `owner`.
    pub fn for_owner(owner: MemberId) -> Self {
        Self::new(Uuid::new_v4(), owner)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn owner(&self) -> MemberId {
        self.owner
    }
}

impl fmt::Display for GlobalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalSession{{id={}, owner={}}}", self.session_id, self.owner)
    }
}
