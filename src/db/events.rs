//! Event lookup and import.

use anyhow::Result;
use async_trait::async_trait;

use super::Database;
use crate::catalog::{Event, EventImport};
use crate::store::EventStore;

impl Database {
    /// Insert or replace an event. With an explicit id the row is upserted
    /// and the id sequence advanced past it; without one a new id is
    /// assigned.
    pub async fn upsert_event(&self, import: &EventImport) -> Result<i64> {
        let id: i64 = match import.id {
            Some(id) => {
                let id = sqlx::query_scalar(
                    "INSERT INTO events (id, name, config, data_en, data_tr, socials, is_archived)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (id) DO UPDATE SET
                       name = EXCLUDED.name, config = EXCLUDED.config,
                       data_en = EXCLUDED.data_en, data_tr = EXCLUDED.data_tr,
                       socials = EXCLUDED.socials, is_archived = EXCLUDED.is_archived,
                       updated_at = NOW()
                     RETURNING id",
                )
                .bind(id)
                .bind(&import.name)
                .bind(&import.config)
                .bind(&import.data_en)
                .bind(&import.data_tr)
                .bind(&import.socials)
                .bind(import.is_archived)
                .fetch_one(&self.pool)
                .await?;
                sqlx::query(
                    "SELECT setval(pg_get_serial_sequence('events', 'id'),
                                   GREATEST((SELECT MAX(id) FROM events), 1))",
                )
                .execute(&self.pool)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    "INSERT INTO events (name, config, data_en, data_tr, socials, is_archived)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING id",
                )
                .bind(&import.name)
                .bind(&import.config)
                .bind(&import.data_en)
                .bind(&import.data_tr)
                .bind(&import.socials)
                .bind(import.is_archived)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(id)
    }
}

#[async_trait]
impl EventStore for Database {
    async fn get_event(&self, event_id: i64) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, name, config, data_en, data_tr, socials, is_archived, created_at, updated_at
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }
}
