use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rust-eth-ingest", version, about = "Ethereum block/transaction ingester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan forward from the newest stored block to the chain head
    CatchUp {
        /// Scan both halves of the range concurrently
        #[arg(long)]
        split: bool,
    },
    /// Scan backward from the oldest stored block down to a floor height
    Backfill {
        /// Lowest height to ingest (defaults to BACKFILL_FLOOR)
        #[arg(long)]
        floor: Option<u64>,
        /// Scan both halves of the range concurrently
        #[arg(long)]
        split: bool,
    },
    /// Re-scan blocks tagged as failed in a JSON log file
    Retry {
        /// JSON log written via LOG_FILE by an earlier run
        #[arg(long)]
        log: PathBuf,
        /// Also replay blocks in which single transactions failed
        #[arg(long)]
        include_tx_failures: bool,
    },
    /// Run the HTTP API server
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
}
