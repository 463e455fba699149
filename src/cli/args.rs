//! CLI argument definitions using clap
//!
//! Commands:
//! - aerodb-replicator check-config --config <path>
//! - aerodb-replicator inspect --state-dir <dir>
//! - aerodb-replicator simulate --clients N --commands M [faults]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Exactly-once command replication
#[derive(Parser, Debug)]
#[command(name = "aerodb-replicator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity: TRACE, INFO, WARN, ERROR or FATAL
    #[arg(long, global = true, default_value = "WARN")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a replication config file and print the effective values
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./replication.json")]
        config: PathBuf,
    },

    /// Print the persisted session tracker state
    Inspect {
        /// Directory holding the session state file
        #[arg(long)]
        state_dir: PathBuf,
    },

    /// Run concurrent replicate calls over an in-process consensus engine
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of concurrent client threads
    #[arg(long, default_value_t = 4)]
    pub clients: usize,

    /// Commands replicated by each client
    #[arg(long, default_value_t = 100)]
    pub commands: usize,

    /// Answer every K-th submission with "not leader"
    #[arg(long)]
    pub reject_every: Option<u64>,

    /// Lose every K-th accepted submission
    #[arg(long)]
    pub drop_every: Option<u64>,

    /// Commit every K-th submission twice
    #[arg(long)]
    pub duplicate_every: Option<u64>,

    /// Persist session state here instead of in memory
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Configuration file; fast simulation retry intervals when absent
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
