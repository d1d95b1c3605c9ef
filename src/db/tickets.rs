//! Ticket issuance and association.
//!
//! Association runs in one transaction:
//!
//! 1. lock the profile row (`FOR UPDATE`) so one user cannot bind two tickets
//!    concurrently;
//! 2. classify the ticket (missing, used, owned by someone else);
//! 3. bind it with `UPDATE ... WHERE is_used = FALSE AND user_id IS NULL`.
//!
//! Two scans of the same code from different users race on step 3; under
//! READ COMMITTED the loser re-evaluates the predicate after the winner
//! commits, updates zero rows and reports the ticket as used.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Database;
use crate::profile::Address;
use crate::store::{Association, Ticket, TicketOwner, TicketStore, TicketWithOwner};

const TICKET_COLUMNS: &str =
    "id, event_id, user_id, code, is_used, used_at, attestation_tx_link, created_at";

#[derive(sqlx::FromRow)]
struct TicketLookupRow {
    id: i64,
    event_id: i64,
    user_id: Option<i64>,
    code: String,
    is_used: bool,
    used_at: Option<DateTime<Utc>>,
    attestation_tx_link: Option<String>,
    created_at: DateTime<Utc>,
    owner_address: Option<String>,
    owner_username: Option<String>,
    owner_avatar: Option<String>,
}

impl From<TicketLookupRow> for TicketWithOwner {
    fn from(row: TicketLookupRow) -> Self {
        let owner = row.owner_address.map(|address| TicketOwner {
            address,
            username: row.owner_username,
            avatar: row.owner_avatar,
        });
        TicketWithOwner {
            ticket: Ticket {
                id: row.id,
                event_id: row.event_id,
                user_id: row.user_id,
                code: row.code,
                is_used: row.is_used,
                used_at: row.used_at,
                attestation_tx_link: row.attestation_tx_link,
                created_at: row.created_at,
            },
            owner,
        }
    }
}

#[async_trait]
impl TicketStore for Database {
    async fn existing_codes(&self, codes: &[String]) -> Result<Vec<String>> {
        let existing = sqlx::query_scalar("SELECT code FROM tickets WHERE code = ANY($1)")
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;
        Ok(existing)
    }

    async fn insert_tickets(&self, event_id: i64, codes: &[String]) -> Result<Vec<String>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let inserted = sqlx::query_scalar(
            "INSERT INTO tickets (event_id, code)
             SELECT $1, unnest($2::text[])
             ON CONFLICT (code) DO NOTHING
             RETURNING code",
        )
        .bind(event_id)
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn find_ticket(&self, event_id: i64, code: &str) -> Result<Option<TicketWithOwner>> {
        let row = sqlx::query_as::<_, TicketLookupRow>(
            "SELECT t.id, t.event_id, t.user_id, t.code, t.is_used, t.used_at,
                    t.attestation_tx_link, t.created_at,
                    u.address AS owner_address, u.username AS owner_username,
                    u.avatar AS owner_avatar
             FROM tickets t
             LEFT JOIN users u ON u.id = t.user_id
             WHERE t.event_id = $1 AND t.code = upper($2)",
        )
        .bind(event_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TicketWithOwner::from))
    }

    async fn associate_ticket(
        &self,
        event_id: i64,
        code: &str,
        address: &Address,
    ) -> Result<Association> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM users WHERE event_id = $1 AND lower(address) = lower($2) FOR UPDATE",
        )
        .bind(event_id)
        .bind(address.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            return Ok(Association::UserNotFound);
        };

        let holds_ticket: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if holds_ticket {
            return Ok(Association::UserHasTicket);
        }

        let current: Option<(bool, Option<i64>)> = sqlx::query_as(
            "SELECT is_used, user_id FROM tickets WHERE event_id = $1 AND code = $2",
        )
        .bind(event_id)
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;
        match current {
            None => return Ok(Association::TicketNotFound),
            Some((true, _)) => return Ok(Association::AlreadyUsed),
            Some((false, Some(_))) => return Ok(Association::OwnedByOther),
            Some((false, None)) => {}
        }

        let claimed = sqlx::query_as::<_, Ticket>(&format!(
            "UPDATE tickets SET user_id = $3, is_used = TRUE, used_at = NOW()
             WHERE event_id = $1 AND code = $2 AND is_used = FALSE AND user_id IS NULL
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(event_id)
        .bind(code)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match claimed {
            Some(ticket) => {
                tx.commit().await?;
                Ok(Association::Claimed(ticket))
            }
            None => Ok(Association::AlreadyUsed),
        }
    }

    async fn set_attestation_link(&self, ticket_id: i64, tx_link: &str) -> Result<()> {
        sqlx::query("UPDATE tickets SET attestation_tx_link = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(tx_link)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tickets(&self, event_id: i64) -> Result<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE event_id = $1 ORDER BY id"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }
}
