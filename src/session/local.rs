//! Local sessions and their operation ids

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one operation within one local session.
///
/// Sequence numbers start at 0 and increase by exactly 1 per operation
/// issued under the same local session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalOperationId {
    local_session_id: i64,
    sequence_number: i64,
}

impl LocalOperationId {
    pub fn new(local_session_id: i64, sequence_number: i64) -> Self {
        Self {
            local_session_id,
            sequence_number,
        }
    }

    pub fn local_session_id(&self) -> i64 {
        self.local_session_id
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }
}

impl fmt::Display for LocalOperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.local_session_id, self.sequence_number)
    }
}

/// A reusable sequencing context, owned by one caller at a time.
///
/// Not `Clone`: exactly one owner may issue operation ids from it.
#[derive(Debug, PartialEq, Eq)]
pub struct LocalSession {
    local_session_id: i64,
    next_sequence_number: i64,
}

impl LocalSession {
    pub(crate) fn new(local_session_id: i64) -> Self {
        Self {
            local_session_id,
            next_sequence_number: 0,
        }
    }

    pub fn local_session_id(&self) -> i64 {
        self.local_session_id
    }

    /// Last sequence number handed out, or -1 if none yet.
    pub fn last_sequence_number_issued(&self) -> i64 {
        self.next_sequence_number - 1
    }

    /// Issue the id of the next operation under this session.
    pub fn next_operation_id(&mut self) -> LocalOperationId {
        let id = LocalOperationId::new(self.local_session_id, self.next_sequence_number);
        self.next_sequence_number += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_has_issued_nothing() {
        let session = LocalSession::new(4);
        assert_eq!(session.local_session_id(), 4);
        assert_eq!(session.last_sequence_number_issued(), -1);
    }

    #[test]
    fn test_operation_ids_increment_by_one() {
        let mut session = LocalSession::new(1);
        let first = session.next_operation_id();
        let second = session.next_operation_id();

        assert_eq!(first, LocalOperationId::new(1, 0));
        assert_eq!(second, LocalOperationId::new(1, 1));
        assert_eq!(session.last_sequence_number_issued(), 1);
    }

    #[test]
    fn test_operation_id_display() {
        assert_eq!(LocalOperationId::new(3, 9).to_string(), "3#9");
    }
}
