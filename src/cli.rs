use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Start a local service fleet in order, police its ports and keep proxy routes in sync")]
pub struct Cli {
    /// Config file path (defaults to fleet.yaml, searched upward)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Working directory relative config paths resolve against
    #[arg(short, long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Override the configured environment (port reclaim only happens in development)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the fleet and keep it running until interrupted
    Up {
        /// Only start these services (can be repeated)
        #[arg(long = "only", value_name = "ID")]
        only: Vec<String>,

        /// Never start these services (can be repeated)
        #[arg(long = "skip", value_name = "ID")]
        skip: Vec<String>,
    },
    /// Stop leftover processes of every enabled service
    Down,
    /// Show who holds each declared port
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate (or load) the messaging trust chain and print its subjects
    Identity,
    /// Print the rendered proxy configuration
    Routes,
    /// Validate configuration without starting services
    Validate,
}
