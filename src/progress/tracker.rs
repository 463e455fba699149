//! Progress Tracker
//!
//! Correlates submitted operations with their eventual outcome.
//!
//! - Registration happens once per operation instance, from its submitter
//! - Resolution for an operation this module never registered (e.g. one
//!   submitted by a peer) is a no-op
//! - The map is sharded by local session id; callers on different local
//!   sessions rarely contend

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::progress::Progress;
use crate::replication::{
    CommandOutcome, DistributedOperation, DistributedOperationId, ReplicationError,
    ReplicationResult,
};
use crate::session::GlobalSession;

const SHARD_COUNT: usize = 16;

type Shard = Mutex<HashMap<DistributedOperationId, Arc<Progress>>>;

/// In-flight operations of one global session.
#[derive(Debug)]
pub struct ProgressTracker {
    global_session: GlobalSession,
    shards: Vec<Shard>,
}

impl ProgressTracker {
    pub fn new(global_session: GlobalSession) -> Self {
        Self {
            global_session,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Register `operation` and hand back its progress handle.
    pub fn track_replication(
        &self,
        operation: &DistributedOperation,
    ) -> ReplicationResult<Arc<Progress>> {
        let id = operation.id();
        if id.session_id != self.global_session.session_id() {
            return Err(ReplicationError::already_tracked(format!(
                "operation {} belongs to a foreign global session",
                id
            )));
        }

        let mut shard = self.shard(&id);
        if shard.contains_key(&id) {
            return Err(ReplicationError::already_tracked(format!(
                "operation {} is already tracked",
                id
            )));
        }
        let progress = Arc::new(Progress::new(id));
        shard.insert(id, Arc::clone(&progress));
        Ok(progress)
    }

    /// Commit notification: stop resubmitting, the result will follow.
    pub fn track_commit(&self, id: &DistributedOperationId) {
        if let Some(progress) = self.get(id) {
            progress.set_committed();
        }
    }

    /// Resolve and forget the operation.
    pub fn track_result(&self, id: &DistributedOperationId, result: ReplicationResult<CommandOutcome>) {
        if let Some(progress) = self.remove(id) {
            progress.set_result(result);
        }
    }

    /// Fail the operation right away so its caller stops waiting.
    pub fn abort(&self, id: &DistributedOperationId, error: ReplicationError) {
        self.track_result(id, Err(error));
    }

    /// Fail every outstanding operation. Returns how many were aborted.
    pub fn abort_all(&self, error: &ReplicationError) -> usize {
        let mut aborted = 0;
        for shard in &self.shards {
            let drained: Vec<Arc<Progress>> = shard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .map(|(_, progress)| progress)
                .collect();
            for progress in drained {
                if progress.set_result(Err(error.clone())) {
                    aborted += 1;
                }
            }
        }
        aborted
    }

    /// Wake every waiting submitter to resend now (e.g. after a leader switch).
    pub fn trigger_replication_event(&self) {
        for shard in &self.shards {
            let progresses: Vec<Arc<Progress>> = shard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for progress in progresses {
                progress.trigger_replication_event();
            }
        }
    }

    /// Number of registered, unresolved operations.
    pub fn in_progress_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    fn get(&self, id: &DistributedOperationId) -> Option<Arc<Progress>> {
        self.shard(id).get(id).cloned()
    }

    fn remove(&self, id: &DistributedOperationId) -> Option<Arc<Progress>> {
        self.shard(id).remove(id)
    }

    fn shard(&self, id: &DistributedOperationId) -> MutexGuard<'_, HashMap<DistributedOperationId, Arc<Progress>>> {
        let index = id.operation_id.local_session_id().rem_euclid(SHARD_COUNT as i64) as usize;
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
