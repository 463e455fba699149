//! Replication module
//!
//! Lifecycle-scoped registry owning everything one replication service
//! shares: the global session, its local session pool, both trackers, the
//! applied-index sequence, the throttle, the availability guard and the
//! metrics. Build one per service and hand out its replicator and applier;
//! nothing here is process-global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::applier::{CommandApplier, StateMachine};
use super::availability::AvailabilityGuard;
use super::config::ReplicationConfig;
use super::consensus::ConsensusEngine;
use super::errors::{ReplicationError, ReplicationResult};
use super::replicator::Replicator;
use super::throttle::Throttle;
use crate::observability::{log_event, Event, ReplicationMetrics};
use crate::progress::ProgressTracker;
use crate::sequence::OutOfOrderSequence;
use crate::session::{
    GlobalSession, GlobalSessionTrackerState, LocalSessionPool, MemberId, SessionTracker,
};
use crate::state::StateStorage;

/// One replication service.
pub struct ReplicationModule {
    me: MemberId,
    config: ReplicationConfig,
    global_session: GlobalSession,
    session_pool: Arc<LocalSessionPool>,
    session_tracker: Arc<SessionTracker>,
    progress_tracker: Arc<ProgressTracker>,
    applied: Arc<OutOfOrderSequence>,
    throttle: Arc<Throttle>,
    guard: Arc<AvailabilityGuard>,
    metrics: Arc<ReplicationMetrics>,
    replicator: Arc<Replicator>,
    applier_created: AtomicBool,
}

impl std::fmt::Debug for ReplicationModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationModule")
            .field("me", &self.me)
            .field("global_session", &self.global_session)
            .field("config", &self.config)
            .field("guard", &self.guard)
            .finish()
    }
}

impl ReplicationModule {
    /// Validate `config`, recover session state from `session_storage` and
    /// wire the service.
    pub fn new(
        me: MemberId,
        config: ReplicationConfig,
        consensus: Arc<dyn ConsensusEngine>,
        session_storage: Box<dyn StateStorage<GlobalSessionTrackerState>>,
    ) -> ReplicationResult<Self> {
        config.validate()?;

        let global_session = GlobalSession::for_owner(me);
        let session_pool = Arc::new(LocalSessionPool::new(global_session));
        let session_tracker = Arc::new(SessionTracker::recover(session_storage)?);
        let progress_tracker = Arc::new(ProgressTracker::new(global_session));
        let applied = Arc::new(OutOfOrderSequence::new(
            session_tracker.last_applied_index(),
            Vec::new(),
        ));
        let throttle = Arc::new(Throttle::new(
            config.total_size_limit_bytes,
            config.throttle_policy,
        ));
        let guard = Arc::new(AvailabilityGuard::new());
        let metrics = Arc::new(ReplicationMetrics::new());

        {
            let progress_tracker = Arc::clone(&progress_tracker);
            let throttle = Arc::clone(&throttle);
            let applied = Arc::clone(&applied);
            guard.on_unavailable(move |reason| {
                progress_tracker.abort_all(&ReplicationError::unavailable(reason));
                throttle.close();
                applied.close();
            });
        }

        let replicator = Arc::new(Replicator::new(
            me,
            consensus,
            Arc::clone(&session_pool),
            Arc::clone(&progress_tracker),
            config.progress_retry.build(),
            config.leader_retry.build(),
            Arc::clone(&guard),
            Arc::clone(&throttle),
            config.max_wait(),
            Arc::clone(&metrics),
        ));

        log_event(
            Event::ServiceStarted,
            &[
                ("member", &me.to_string()),
                ("global_session", &global_session.session_id().to_string()),
                ("log_index", &session_tracker.last_applied_index().to_string()),
                ("limit_bytes", &config.total_size_limit_bytes.to_string()),
            ],
        );

        Ok(Self {
            me,
            config,
            global_session,
            session_pool,
            session_tracker,
            progress_tracker,
            applied,
            throttle,
            guard,
            metrics,
            replicator,
            applier_created: AtomicBool::new(false),
        })
    }

    /// The single applier of this module's commit stream. Fails if one was
    /// already created.
    pub fn applier<M: StateMachine>(&self, state_machine: M) -> ReplicationResult<CommandApplier<M>> {
        if self.applier_created.swap(true, Ordering::SeqCst) {
            return Err(ReplicationError::configuration_error(
                "an applier already consumes this module's commit stream",
            ));
        }
        Ok(CommandApplier::new(
            state_machine,
            Arc::clone(&self.session_tracker),
            Arc::clone(&self.progress_tracker),
            Arc::clone(&self.applied),
            Arc::clone(&self.guard),
            Arc::clone(&self.metrics),
        ))
    }

    pub fn replicator(&self) -> Arc<Replicator> {
        Arc::clone(&self.replicator)
    }

    /// Abort everything outstanding and refuse new work.
    pub fn shutdown(&self) {
        self.guard.shutdown();
    }

    pub fn me(&self) -> MemberId {
        self.me
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn global_session(&self) -> GlobalSession {
        self.global_session
    }

    pub fn session_pool(&self) -> &LocalSessionPool {
        &self.session_pool
    }

    pub fn session_tracker(&self) -> &SessionTracker {
        &self.session_tracker
    }

    pub fn progress_tracker(&self) -> &ProgressTracker {
        &self.progress_tracker
    }

    /// Gap-free watermark of processed log indices.
    pub fn applied_sequence(&self) -> &Arc<OutOfOrderSequence> {
        &self.applied
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn availability_guard(&self) -> &Arc<AvailabilityGuard> {
        &self.guard
    }

    pub fn metrics(&self) -> &ReplicationMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{Command, LoopbackConsensus, ReplicationErrorKind};
    use crate::state::InMemoryStateStorage;

    struct Echo;

    impl StateMachine for Echo {
        fn apply(&mut self, command: &Command, _log_index: i64) -> Result<Vec<u8>, String> {
            Ok(command.payload().to_vec())
        }
    }

    fn module() -> ReplicationModule {
        let (engine, _commits) = LoopbackConsensus::new();
        ReplicationModule::new(
            MemberId::random(),
            ReplicationConfig::default(),
            Arc::new(engine),
            Box::new(InMemoryStateStorage::<GlobalSessionTrackerState>::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_only_one_applier() {
        let module = module();
        assert!(module.applier(Echo).is_ok());
        assert!(module.applier(Echo).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (engine, _commits) = LoopbackConsensus::new();
        let config = ReplicationConfig {
            total_size_limit_bytes: 0,
            ..ReplicationConfig::default()
        };
        let err = ReplicationModule::new(
            MemberId::random(),
            config,
            Arc::new(engine),
            Box::new(InMemoryStateStorage::<GlobalSessionTrackerState>::new()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Configuration);
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let module = module();
        module.shutdown();

        let err = module
            .replicator()
            .replicate(Command::new(b"x".to_vec()))
            .unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::Unavailable);
        assert!(module.applied_sequence().await_number(0, std::time::Duration::ZERO).is_err());
    }

    #[test]
    fn test_global_session_owned_by_member() {
        let module = module();
        assert_eq!(module.global_session().owner(), module.me());
    }
}
