//! # Persistence Capabilities
//!
//! The evaluator, ticket registry and HTTP handlers depend on these traits
//! rather than on [`crate::db::Database`] directly, so the same flows can run
//! against Postgres in production and an in-memory store in tests.
//!
//! Implementations must make the guarded operations atomic:
//!
//! - [`ProfileStore::complete_task`] writes only if the task is not already
//!   completed. A second identical call returns [`Completion::AlreadyCompleted`].
//! - [`ProfileStore::reserve_task`] succeeds only if the task is neither
//!   completed nor pending. A subname passed with the reservation is written
//!   in the same step, so the unique index decides between two claimants
//!   before any chain write happens.
//! - [`TicketStore::associate_ticket`] binds a ticket only if it is unused and
//!   unbound, and only if the profile holds no other ticket for the event.

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::Event;
use crate::profile::{Address, Profile, ProfilePatch, TaskId, TaskRecord};

/// Outcome of a guarded task completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Completed(Profile),
    AlreadyCompleted,
    /// The profile row vanished between load and write.
    ProfileMissing,
    /// A unique field in the patch is already taken (`"username"`, `"subname"`).
    Conflict(&'static str),
}

/// Outcome of a task reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    /// Task already completed or pending, or no such profile.
    Busy,
    /// The subname held with the reservation belongs to another profile.
    Conflict(&'static str),
}

/// Outcome of a profile upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Saved(Profile),
    Conflict(&'static str),
}

/// Ticket row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub event_id: i64,
    pub user_id: Option<i64>,
    pub code: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub attestation_tx_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public fields of a ticket's owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketOwner {
    pub address: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

/// A ticket joined with its owner, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketWithOwner {
    pub ticket: Ticket,
    pub owner: Option<TicketOwner>,
}

/// Outcome of a guarded ticket association.
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    Claimed(Ticket),
    UserNotFound,
    UserHasTicket,
    TicketNotFound,
    AlreadyUsed,
    OwnedByOther,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: i64) -> Result<Option<Event>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Case-insensitive lookup.
    async fn get_profile(&self, event_id: i64, address: &Address) -> Result<Option<Profile>>;

    /// Insert a fresh profile, or return the existing row untouched if one was
    /// created concurrently.
    async fn create_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Profile>;

    /// Insert when missing, otherwise merge the supplied fields.
    async fn upsert_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Upsert>;

    /// Remove the profile; returns the number of rows deleted.
    async fn delete_profile(&self, event_id: i64, address: &Address) -> Result<u64>;

    /// Guarded write of a completed task record, adding its points to the score
    /// and applying `patch` in the same statement.
    async fn complete_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        record: &TaskRecord,
        patch: &ProfilePatch,
    ) -> Result<Completion>;

    /// Mark a task pending ahead of an on-chain write, claiming `subname` for
    /// the profile at the same time when one is given.
    async fn reserve_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<Reservation>;

    /// Drop a pending reservation after a failed on-chain write, along with
    /// the subname it held.
    async fn release_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<()>;

    /// Address of the profile in `event_id` holding `username` (case-insensitive).
    async fn username_owner(&self, event_id: i64, username: &str) -> Result<Option<String>>;

    /// Is `subname` held by any profile, in any event?
    async fn subname_taken(&self, subname: &str) -> Result<bool>;

    /// Profiles ordered by score descending, then by creation time.
    async fn leaderboard(&self, event_id: i64, limit: i64) -> Result<Vec<Profile>>;

    async fn list_profiles(&self, event_id: i64) -> Result<Vec<Profile>>;

    /// Overwrite a stored score (used by rescoring).
    async fn set_score(&self, profile_id: i64, score: i64) -> Result<()>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Codes that already exist anywhere in the table.
    async fn existing_codes(&self, codes: &[String]) -> Result<Vec<String>>;

    /// Insert codes, skipping any that collide. Returns the codes inserted.
    async fn insert_tickets(&self, event_id: i64, codes: &[String]) -> Result<Vec<String>>;

    async fn find_ticket(&self, event_id: i64, code: &str) -> Result<Option<TicketWithOwner>>;

    async fn associate_ticket(
        &self,
        event_id: i64,
        code: &str,
        address: &Address,
    ) -> Result<Association>;

    async fn set_attestation_link(&self, ticket_id: i64, tx_link: &str) -> Result<()>;

    async fn list_tickets(&self, event_id: i64) -> Result<Vec<Ticket>>;
}

/// Everything the HTTP layer needs from persistence.
#[async_trait]
pub trait Store: EventStore + ProfileStore + TicketStore {
    async fn health_check(&self) -> Result<()>;
}
