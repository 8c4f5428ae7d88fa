//! # Receipt Index CLI (`rcpt`)
//!
//! The `rcpt` binary is the primary interface for Receipt Index. It provides
//! commands for database initialization, receipt ingestion, and searching
//! the resulting metadata index.
//!
//! ## Usage
//!
//! ```bash
//! rcpt --config ./config/rcpt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rcpt init` | Create the SQLite database and run schema migrations |
//! | `rcpt sources` | Show the configured message source and its health |
//! | `rcpt ingest` | Ingest receipts from the mail folder |
//! | `rcpt search` | Search indexed receipts by vendor/amount/date |
//! | `rcpt show <id>` | Show one receipt and where its PDF lives |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rcpt init --config ./config/rcpt.toml
//!
//! # Ingest new receipts
//! rcpt ingest --config ./config/rcpt.toml
//!
//! # Find the receipt behind a $42.99 card charge from early March
//! rcpt search --vendor amazon --amount-min 42 --amount-max 43 --from 2025-03-01
//! ```

mod config;
mod db;
mod doc_text;
mod extract;
mod ingest;
mod migrate;
mod models;
mod render;
mod repo;
mod search;
mod show;
mod source;
mod sources;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Receipt Index CLI — turn receipt emails into a searchable index plus
/// normalized PDF renditions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rcpt.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rcpt",
    about = "Receipt Index — a searchable index of receipt emails",
    version,
    long_about = "Receipt Index ingests receipt emails from a mail folder, extracts structured \
    metadata (vendor, amount, date) with a local model, normalizes each message into a PDF \
    rendition, and persists everything into a searchable SQLite index."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rcpt.toml`. Database, store, source, extraction,
    /// and render settings are all read from this file.
    #[arg(long, global = true, default_value = "./config/rcpt.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the receipts table with its
    /// uniqueness and validity constraints. Idempotent — running it
    /// multiple times is safe.
    Init,

    /// Show the configured message source and its health.
    Sources,

    /// Ingest receipts from the configured mail folder.
    ///
    /// Fetches unprocessed messages, extracts metadata, renders each one
    /// to a PDF, stores the PDF under the store root, and inserts a receipt
    /// row. Items that fail are reported and skipped; the run continues.
    /// Re-running over the same messages inserts nothing twice.
    Ingest {
        /// List candidate messages without extracting, rendering, or writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of messages to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed receipts.
    ///
    /// All filters are optional and combined with AND. Results are ordered
    /// by transaction date, most recent first.
    Search {
        /// Case-insensitive substring of the vendor name.
        #[arg(long)]
        vendor: Option<String>,

        /// Minimum amount, inclusive (e.g. 10 or 10.50).
        #[arg(long)]
        amount_min: Option<String>,

        /// Maximum amount, inclusive.
        #[arg(long)]
        amount_max: Option<String>,

        /// Earliest transaction date, inclusive (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Latest transaction date, inclusive (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one receipt and the location of its PDF rendition.
    Show {
        /// Receipt UUID, as printed by `rcpt search`.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Ingest { dry_run, limit } => {
            ingest::run_ingest(&cfg, dry_run, limit).await?;
        }
        Commands::Search {
            vendor,
            amount_min,
            amount_max,
            from,
            to,
            limit,
        } => {
            search::run_search(&cfg, vendor, amount_min, amount_max, from, to, limit).await?;
        }
        Commands::Show { id } => {
            show::run_show(&cfg, &id).await?;
        }
    }

    Ok(())
}
