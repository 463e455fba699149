//! CLI command implementations

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use serde_json::json;

use crate::observability::{Logger, Severity};
use crate::replication::{
    Command as ReplicatedCommand, CommandOutcome, FaultPlan, LoopbackConsensus, ReplicationConfig,
    ReplicationModule, RetryStrategyConfig, StateMachine,
};
use crate::session::{GlobalSessionTrackerState, MemberId, SESSION_TRACKER_NAME};
use crate::state::{DurableStateStorage, InMemoryStateStorage, StateStorage};

use super::args::{Cli, Command, SimulateArgs};
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let severity = Severity::parse(&cli.log_level).ok_or_else(|| {
        CliError::config_error(format!("Invalid log level: '{}'", cli.log_level))
    })?;
    Logger::set_min_severity(severity);

    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::CheckConfig { config } => check_config(&config),
        Command::Inspect { state_dir } => inspect(&state_dir),
        Command::Simulate(args) => simulate(&args),
    }
}

/// Print the effective, validated configuration
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = ReplicationConfig::load(config_path)?;
    write_response(serde_json::to_value(&config)?)
}

/// Print the persisted session tracker state
pub fn inspect(state_dir: &Path) -> CliResult<()> {
    if !state_dir.is_dir() {
        return Err(CliError::state_error(format!(
            "State directory {} does not exist",
            state_dir.display()
        )));
    }

    let storage: DurableStateStorage<GlobalSessionTrackerState> =
        DurableStateStorage::open(state_dir, SESSION_TRACKER_NAME)?;
    let state = storage.load()?.ok_or_else(|| {
        CliError::state_error(format!(
            "No session state in {}",
            storage.state_path().display()
        ))
    })?;

    write_response(serde_json::to_value(&state)?)
}

/// Retry intervals short enough that dropped submissions resolve quickly.
fn simulation_config() -> ReplicationConfig {
    ReplicationConfig {
        progress_retry: RetryStrategyConfig::Exponential {
            initial_ms: 20,
            upper_bound_ms: 320,
        },
        leader_retry: RetryStrategyConfig::Constant { interval_ms: 5 },
        max_wait_ms: Some(30_000),
        ..ReplicationConfig::default()
    }
}

/// Counts how often each distinct payload was applied.
#[derive(Debug, Default)]
struct ApplicationCounter {
    applications: HashMap<Vec<u8>, u64>,
}

impl StateMachine for ApplicationCounter {
    fn apply(&mut self, command: &ReplicatedCommand, _log_index: i64) -> Result<Vec<u8>, String> {
        let count = self
            .applications
            .entry(command.payload().to_vec())
            .or_insert(0);
        *count += 1;
        Ok(count.to_string().into_bytes())
    }
}

#[derive(Debug, Default)]
struct ClientTally {
    succeeded: u64,
    already_applied: u64,
    failed: HashMap<&'static str, u64>,
}

/// Run `clients` threads each replicating `commands` distinct commands
pub fn simulate(args: &SimulateArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => ReplicationConfig::load(path)?,
        None => simulation_config(),
    };
    let started_at = Utc::now();

    let (engine, commits) = LoopbackConsensus::with_faults(FaultPlan {
        reject_every: args.reject_every,
        drop_every: args.drop_every,
        duplicate_every: args.duplicate_every,
    });
    let engine = Arc::new(engine);

    let storage: Box<dyn StateStorage<GlobalSessionTrackerState>> = match &args.state_dir {
        Some(dir) => Box::new(DurableStateStorage::<GlobalSessionTrackerState>::open(
            dir,
            SESSION_TRACKER_NAME,
        )?),
        None => Box::new(InMemoryStateStorage::<GlobalSessionTrackerState>::new()),
    };

    let module = ReplicationModule::new(MemberId::random(), config, engine.clone(), storage)?;
    engine.resume_after(module.session_tracker().last_applied_index());

    let mut applier = module.applier(ApplicationCounter::default())?;
    let applier_thread = thread::spawn(move || {
        let result = applier.run(commits);
        (result, applier)
    });

    let replicator = module.replicator();
    let tallies: Vec<ClientTally> = thread::scope(|scope| {
        let handles: Vec<_> = (0..args.clients)
            .map(|client| {
                let replicator = Arc::clone(&replicator);
                let commands = args.commands;
                scope.spawn(move || {
                    let mut tally = ClientTally::default();
                    for n in 0..commands {
                        let payload = format!("client-{}-command-{}", client, n);
                        match replicator.replicate(ReplicatedCommand::new(payload)) {
                            Ok(CommandOutcome::Applied { .. }) => tally.succeeded += 1,
                            Ok(CommandOutcome::AlreadyApplied { .. }) => {
                                tally.already_applied += 1
                            }
                            Err(e) => *tally.failed.entry(e.kind.code()).or_insert(0) += 1,
                        }
                    }
                    tally
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_default())
            .collect()
    });

    engine.disconnect();
    let (applier_result, applier) = applier_thread
        .join()
        .map_err(|_| CliError::simulation_failed("applier thread panicked"))?;
    module.shutdown();

    let applied_watermark = applier.last_applied();
    let counter = applier.into_state_machine();
    let applied_more_than_once = counter
        .applications
        .values()
        .filter(|count| **count > 1)
        .count();

    let mut failed: HashMap<&'static str, u64> = HashMap::new();
    for tally in &tallies {
        for (code, count) in &tally.failed {
            *failed.entry(*code).or_insert(0) += *count;
        }
    }

    let finished_at = Utc::now();
    write_response(json!({
        "started_at": started_at.to_rfc3339(),
        "finished_at": finished_at.to_rfc3339(),
        "elapsed_ms": (finished_at - started_at).num_milliseconds(),
        "clients": args.clients,
        "commands_per_client": args.commands,
        "succeeded": tallies.iter().map(|t| t.succeeded).sum::<u64>(),
        "already_applied": tallies.iter().map(|t| t.already_applied).sum::<u64>(),
        "failed": failed,
        "distinct_commands_applied": counter.applications.len(),
        "commands_applied_more_than_once": applied_more_than_once,
        "exactly_once": applied_more_than_once == 0,
        "applied_log_index": applied_watermark.number,
        "applier_halted": applier_result
            .as_ref()
            .err()
            .map(|e| e.to_string()),
        "submissions": engine.submissions(),
        "committed_entries": engine.committed(),
        "metrics": module.metrics().snapshot(),
    }))?;

    applier_result.map_err(CliError::from)
}
