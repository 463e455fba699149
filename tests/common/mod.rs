//! Harness for integration tests
//!
//! Wires a `ReplicationModule` over `LoopbackConsensus` with the applier on
//! its own thread, and records every command the state machine executes.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use aerodb_replicator::replication::{
    Command, FaultPlan, LoopbackConsensus, ReplicationConfig, ReplicationModule,
    ReplicationResult, RetryStrategyConfig, StateMachine,
};
use aerodb_replicator::session::{GlobalSessionTrackerState, MemberId};
use aerodb_replicator::state::{InMemoryStateStorage, StateStorage};

/// State machine recording every payload it executes.
#[derive(Default)]
pub struct Recorder {
    applied: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl StateMachine for Recorder {
    fn apply(&mut self, command: &Command, _log_index: i64) -> Result<Vec<u8>, String> {
        if command.payload().starts_with(b"reject") {
            return Err("rejected by state machine".to_string());
        }
        let mut applied = self.applied.lock().unwrap();
        applied.push(command.payload().to_vec());
        Ok(applied.len().to_string().into_bytes())
    }
}

pub struct Harness {
    pub module: ReplicationModule,
    pub engine: Arc<LoopbackConsensus>,
    pub applied: Arc<Mutex<Vec<Vec<u8>>>>,
    applier: Option<JoinHandle<ReplicationResult<()>>>,
}

/// Short retry intervals so fault scenarios finish quickly.
pub fn fast_config() -> ReplicationConfig {
    ReplicationConfig {
        progress_retry: RetryStrategyConfig::Exponential {
            initial_ms: 20,
            upper_bound_ms: 200,
        },
        leader_retry: RetryStrategyConfig::Constant { interval_ms: 5 },
        max_wait_ms: Some(10_000),
        ..ReplicationConfig::default()
    }
}

/// Leader retries stay fast, but a commit is never considered overdue within
/// a test's lifetime, so no resubmission races a slow applier.
pub fn patient_config() -> ReplicationConfig {
    ReplicationConfig {
        progress_retry: RetryStrategyConfig::Exponential {
            initial_ms: 60_000,
            upper_bound_ms: 60_000,
        },
        ..fast_config()
    }
}

impl Harness {
    pub fn start(config: ReplicationConfig) -> Self {
        Self::start_with(
            config,
            FaultPlan::default(),
            Box::new(InMemoryStateStorage::<GlobalSessionTrackerState>::new()),
        )
    }

    pub fn start_with(
        config: ReplicationConfig,
        faults: FaultPlan,
        storage: Box<dyn StateStorage<GlobalSessionTrackerState>>,
    ) -> Self {
        let (engine, commits) = LoopbackConsensus::with_faults(faults);
        let engine = Arc::new(engine);
        let module =
            ReplicationModule::new(MemberId::random(), config, engine.clone(), storage).unwrap();
        engine.resume_after(module.session_tracker().last_applied_index());

        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut applier = module
            .applier(Recorder {
                applied: Arc::clone(&applied),
            })
            .unwrap();
        let handle = thread::spawn(move || applier.run(commits));

        Self {
            module,
            engine,
            applied,
            applier: Some(handle),
        }
    }

    /// Payloads executed so far, in application order.
    pub fn applied(&self) -> Vec<Vec<u8>> {
        self.applied.lock().unwrap().clone()
    }

    /// Close the commit stream and wait for the applier to drain it.
    pub fn stop(mut self) -> ReplicationResult<()> {
        self.engine.disconnect();
        let result = match self.applier.take() {
            Some(handle) => handle.join().unwrap(),
            None => Ok(()),
        };
        self.module.shutdown();
        result
    }
}
