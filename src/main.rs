//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the HTTP server and the operational tasks that
//! run against the database directly.
//!
//! ## Subcommands
//!
//! - `serve`: run the HTTP API (Postgres, or `--memory` for local development)
//! - `migrate`: apply the embedded SQL migrations
//! - `import-event`: upsert an event from a JSON export
//! - `issue-tickets`: generate ticket codes without going through HTTP
//! - `rescore`: recompute stored scores from task maps and repair drift
//! - `check-config`: validate the TOML config and print a summary
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--config` / `ONCHAIN_QUEST_CONFIG`: TOML config file (missing file = defaults).
//!
//! Logging goes to stderr; set `LOG_FORMAT=json` for structured output and
//! `RUST_LOG` to adjust the filter.

mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "onchain-quest",
    about = "Quest progression and ticket redemption service for onchain onboarding events"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Path to the TOML config file
    #[arg(
        long,
        env = "ONCHAIN_QUEST_CONFIG",
        default_value = "onchain-quest.toml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
        /// Directory of static frontend files to serve
        #[arg(long)]
        static_dir: Option<PathBuf>,
        /// Keep all state in memory instead of PostgreSQL (development only)
        #[arg(long)]
        memory: bool,
        /// Event JSON files to preload into the in-memory store
        #[arg(long, requires = "memory")]
        event_file: Vec<PathBuf>,
    },
    /// Apply database migrations
    Migrate,
    /// Insert or replace an event from a JSON export
    ImportEvent {
        /// Event JSON file
        #[arg(long)]
        file: PathBuf,
        /// Event id to use (overrides the id in the file)
        #[arg(long)]
        id: Option<i64>,
    },
    /// Generate ticket codes for an event
    IssueTickets {
        #[arg(long)]
        event_id: i64,
        /// Number of tickets (1-100)
        #[arg(long)]
        count: u32,
    },
    /// Recompute profile scores from their task maps
    Rescore {
        #[arg(long)]
        event_id: i64,
        /// Report drift without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the config file and print a summary
    CheckConfig,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for K8s, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            port,
            static_dir,
            memory,
            event_file,
        } => cli::run_serve(&cli, *port, static_dir.as_deref(), *memory, event_file),
        Commands::Migrate => cli::run_migrate(&cli),
        Commands::ImportEvent { file, id } => cli::run_import_event(&cli, file, *id),
        Commands::IssueTickets { event_id, count } => {
            cli::run_issue_tickets(&cli, *event_id, *count)
        }
        Commands::Rescore { event_id, dry_run } => cli::run_rescore(&cli, *event_id, *dry_run),
        Commands::CheckConfig => cli::run_check_config(&cli),
    }
}
