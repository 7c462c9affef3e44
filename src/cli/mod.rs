pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flowcast")]
#[command(about = "Feed ingestion with live update fanout", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/flowcast/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of sources fetched in parallel (overrides the config file)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler, retention sweeper and websocket server
    Serve,
    /// Add a new source and fetch it once
    Add {
        /// URL of the feed to add
        url: String,
        /// Owning account
        #[arg(long, default_value_t = 1)]
        account: i64,
    },
    /// Remove a source and its items
    Remove {
        /// URL of the feed to remove
        url: String,
        #[arg(long, default_value_t = 1)]
        account: i64,
    },
    /// List sources or items
    List {
        /// Show items instead of sources
        #[arg(long)]
        items: bool,
    },
    /// Fetch one source now
    Refresh {
        source_id: i64,
    },
    /// Run one ingestion cycle over every due source
    Update,
    /// Delete items older than the configured retention age
    Prune,
}
