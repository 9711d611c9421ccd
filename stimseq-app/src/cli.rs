use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Runs stimulus-sequence trials from a session file.
#[derive(Parser, Debug)]
#[command(name = "stimseq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format on stderr.
    #[arg(long, value_enum, default_value = "human", global = true, env = "STIMSEQ_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every trial of a session with a simulated participant.
    Run(RunArgs),
    /// Validate a session file and print each trial's schedule.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Session file (JSON).
    pub session: PathBuf,

    /// Write result records here instead of stdout, one JSON object per line.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Seed for the simulated participant; overrides the session file.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Use a virtual clock so the session completes instantly.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Session file (JSON).
    pub session: PathBuf,
}
