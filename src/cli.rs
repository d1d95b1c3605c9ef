//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Each subcommand
//! builds its own tokio runtime and blocks on the async work, so the entry
//! point stays synchronous.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use onchain_quest::catalog::EventImport;
use onchain_quest::config::AppConfig;
use onchain_quest::db::Database;
use onchain_quest::gateway::HttpGateway;
use onchain_quest::store::{MemoryStore, ProfileStore, Store};
use onchain_quest::ticket::TicketRegistry;
use onchain_quest::{api, score};
use tracing::{info, warn};

use super::Cli;

fn require_database_url(cli: &Cli) -> Result<&str> {
    cli.database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)"))
}

fn read_event_file(path: &Path) -> Result<EventImport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    EventImport::from_json(&raw).with_context(|| format!("invalid event file {}", path.display()))
}

// ── Server ──────────────────────────────────────────────────────

pub fn run_serve(
    cli: &Cli,
    port: Option<u16>,
    static_dir: Option<&Path>,
    memory: bool,
    event_files: &[PathBuf],
) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let port = port.unwrap_or(config.server.port);
    let static_dir = static_dir
        .map(Path::to_path_buf)
        .or_else(|| config.server.static_dir.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let store: Arc<dyn Store> = if memory {
        warn!("using in-memory store, state is lost on exit");
        let store = MemoryStore::new();
        for path in event_files {
            let import = read_event_file(path)?;
            let id = store.add_event(&import);
            info!(event_id = id, name = %import.name, "event loaded");
        }
        Arc::new(store)
    } else {
        let database_url = require_database_url(cli)?;
        let database = rt.block_on(Database::connect(database_url))?;
        rt.block_on(database.migrate())?;
        Arc::new(database)
    };

    let gateway = Arc::new(HttpGateway::from_config(&config.gateway)?);
    info!(
        port,
        admins = config.admin.addresses.len(),
        gateway = %config.gateway.url,
        "onchain-quest starting"
    );
    let state = api::AppState::new(store, gateway.clone(), gateway, config);
    rt.block_on(api::run(state, port, static_dir.as_deref()))
}

// ── Database Maintenance ────────────────────────────────────────

pub fn run_migrate(cli: &Cli) -> Result<()> {
    let database_url = require_database_url(cli)?;
    let rt = tokio::runtime::Runtime::new()?;
    let database = rt.block_on(Database::connect(database_url))?;
    rt.block_on(database.migrate())?;
    info!("migrations applied");
    Ok(())
}

/// Validate the file before touching the database so a broken export fails
/// fast even without `DATABASE_URL`.
pub fn run_import_event(cli: &Cli, file: &Path, id: Option<i64>) -> Result<()> {
    let mut import = read_event_file(file)?;
    if id.is_some() {
        import.id = id;
    }
    let database_url = require_database_url(cli)?;

    let rt = tokio::runtime::Runtime::new()?;
    let database = rt.block_on(Database::connect(database_url))?;
    let event_id = rt.block_on(database.upsert_event(&import))?;
    info!(event_id, name = %import.name, "event imported");
    println!("{event_id}");
    Ok(())
}

pub fn run_issue_tickets(cli: &Cli, event_id: i64, count: u32) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let database_url = require_database_url(cli)?;

    let rt = tokio::runtime::Runtime::new()?;
    let database = rt.block_on(Database::connect(database_url))?;
    // Attestation happens at association time, so no chain writer is needed here.
    let gateway = Arc::new(HttpGateway::from_config(&config.gateway)?);
    let registry = TicketRegistry::new(gateway, false, config.tickets.max_batch);
    let codes = rt.block_on(registry.issue(&database, event_id, count))?;
    info!(event_id, count = codes.len(), "tickets issued");
    for code in codes {
        println!("{code}");
    }
    Ok(())
}

pub fn run_rescore(cli: &Cli, event_id: i64, dry_run: bool) -> Result<()> {
    let database_url = require_database_url(cli)?;
    let rt = tokio::runtime::Runtime::new()?;
    let database = rt.block_on(Database::connect(database_url))?;

    let profiles = rt.block_on(database.list_profiles(event_id))?;
    let repairs = score::repairs(&profiles);
    for repair in &repairs {
        println!(
            "{}  stored={} computed={}",
            repair.address, repair.stored, repair.computed
        );
        if !dry_run {
            rt.block_on(database.set_score(repair.profile_id, repair.computed))?;
        }
    }
    info!(
        event_id,
        profiles = profiles.len(),
        drifted = repairs.len(),
        dry_run,
        "rescore finished"
    );
    Ok(())
}

pub fn run_check_config(cli: &Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;
    println!("config: {}", cli.config.display());
    println!("  port:              {}", config.server.port);
    println!("  admins:            {}", config.admin.addresses.len());
    println!("  enforce locks:     {}", config.quests.enforce_locks);
    println!("  reserved subnames: {}", config.reserved_subnames().len());
    println!("  subname parent:    {}", config.quests.subname_parent);
    println!("  ticket attestation: {}", config.tickets.attest);
    println!("  gateway:           {}", config.gateway.url);
    Ok(())
}
