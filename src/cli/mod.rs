//! CLI module
//!
//! Provides command-line interface for:
//! - check-config: Validate a replication config file
//! - inspect: Dump persisted session tracker state
//! - simulate: Exercise the replication layer over loopback consensus

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, SimulateArgs};
pub use commands::{check_config, inspect, run, run_command, simulate};
pub use errors::{CliError, CliErrorCode, CliResult};
