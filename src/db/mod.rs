//! # Database — PostgreSQL Storage Layer
//!
//! Implements the [`crate::store`] traits on a `sqlx::PgPool`.
//!
//! ## Schema
//!
//! - `events`: event metadata and the quest list in `data_en.tasks`
//! - `users`: one profile per `(event_id, lower(address))`, task map in JSONB
//! - `tickets`: six-character redeemable codes, bound to at most one user
//!
//! The SQL lives in `migrations/` and is embedded at compile time, so
//! `onchain-quest migrate` needs nothing but a database URL.
//!
//! ## Module Structure
//!
//! - [`events`]: event lookup and import
//! - [`profiles`]: profile CRUD and guarded task completion
//! - [`tickets`]: ticket issuance and the association transaction
//!
//! ## Guarded writes
//!
//! Every state transition with money or a ticket attached is a single
//! conditional `UPDATE` (or a transaction holding a row lock), never a
//! read-then-write from Rust. See the submodules for the exact predicates.

mod events;
mod profiles;
mod tickets;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::store::Store;

/// Embedded migrations, applied in order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_events",
        include_str!("../../migrations/001_create_events.sql"),
    ),
    (
        "002_create_users",
        include_str!("../../migrations/002_create_users.sql"),
    ),
    (
        "003_create_tickets",
        include_str!("../../migrations/003_create_tickets.sql"),
    ),
];

/// Map a unique-index violation on `users` to the profile field it guards.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<&'static str> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    match db_err.constraint() {
        Some("users_event_username_key") => Some("username"),
        Some("users_subname_key") => Some("subname"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Parses the URL by hand so percent-encoded credentials and pooler
    /// usernames containing dots survive intact.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url).context("invalid database URL")?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration {name} failed"))?;
            info!(migration = name, "migration applied");
        }
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    /// Execute `SELECT 1`; used by the `/readyz` probe.
    async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
