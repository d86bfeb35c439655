pub mod onboard;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "HabitLens",
    about = "Daily-check extraction & completion analytics for workspace databases"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Onboard,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Status,
    Doctor,
    /// Fetch every dashboard page's daily checks and store the joined table
    Extract {
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compute completion aggregates from the stored table
    Analyze {
        #[arg(long)]
        date: Option<String>,
    },
    /// Extract, then analyze
    Run {
        #[arg(long)]
        workers: Option<usize>,
    },
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}
