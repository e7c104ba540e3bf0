//! # vector-sync CLI (`vsync`)
//!
//! Keeps a vector index in sync with a document collection and searches it.
//!
//! ## Usage
//!
//! ```bash
//! vsync --config ./config/vsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vsync init` | Create the sync state database |
//! | `vsync index info` | Show the vector index dimension, metric and size |
//! | `vsync index init` | Create the Vectorize index if it does not exist |
//! | `vsync sync` | Run one sync pass |
//! | `vsync search "<query>"` | Semantic search over the index |
//! | `vsync status` | Show the stored sync state |
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vector_sync::{commands, config};

/// vector-sync: incremental document → vector index synchronization.
#[derive(Parser)]
#[command(
    name = "vsync",
    about = "Keep a vector index in sync with a document collection",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the sync state database and schema. Idempotent.
    Init,

    /// Inspect or provision the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Sync the configured source into the vector index.
    ///
    /// Only added and changed documents are embedded; removed documents are
    /// deleted from the index.
    Sync,

    /// Search the vector index.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Drop matches scoring at or below this value.
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Show sync state for the configured collection.
    Status,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Show index dimension, metric and vector count.
    Info,
    /// Create the index (and its metadata index) if missing.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Index { action } => match action {
            IndexAction::Info => commands::run_index_info(&cfg).await?,
            IndexAction::Init => commands::run_index_init(&cfg).await?,
        },
        Commands::Sync => commands::run_sync(&cfg).await?,
        Commands::Search {
            query,
            limit,
            min_score,
        } => commands::run_search(&cfg, &query, limit, min_score).await?,
        Commands::Status => commands::run_status(&cfg).await?,
    }

    Ok(())
}
