use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "upstage",
    version,
    about = "Chunked upload staging and reassembly for instrument data files"
)]
pub struct Cli {
    /// Path to the config file (defaults to ~/.config/upstage/config.toml)
    #[arg(short, long, global = true, env = "UPSTAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the reassembly worker and periodic janitor sweeps
    Run,

    /// Run the janitor sweeps once and process anything they queue
    Sweep,

    /// Reassemble one destination now, without waiting for the worker
    Complete {
        /// Destination file id
        destination_id: i64,
    },

    /// Show upload progress for a destination
    Status {
        /// Destination file id
        destination_id: i64,
    },
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
