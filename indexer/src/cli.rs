use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chain-mirror")]
#[command(about = "Mirror a remote node's blockchain into a relational store", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Node RPC endpoint, e.g. ws://127.0.0.1:11898
    #[arg(long)]
    pub node_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Blocks requested per catch-up window
    #[arg(long)]
    pub catch_up_window: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the node and keep the mirror in sync (default)
    Run,
    /// Delete every block at or above HEIGHT, with its transactions
    Rewind {
        height: u64,
    },
    /// Empty every table
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Print the height ranges missing from the mirror
    Gaps,
}

pub fn parse_args() -> Args {
    Args::parse()
}
