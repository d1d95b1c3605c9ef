//! Profile CRUD and guarded task completion.
//!
//! The task map is a JSONB object keyed by task id. Completion and
//! reservation are single `UPDATE ... WHERE` statements whose predicate reads
//! the task entry inside the same row, so two concurrent submissions of the
//! same quest can never both succeed:
//!
//! - complete: `tasks -> id ->> 'isCompleted'` is not true
//! - reserve: neither `isCompleted` nor `pending` is true; a subname claimed
//!   with the reservation is checked by `users_subname_key` in the same statement
//! - release: `pending` is true and `isCompleted` is not

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::{unique_violation, Database};
use crate::profile::{Address, Profile, ProfilePatch, ProfileRole, TaskId, TaskMap, TaskRecord};
use crate::store::{Completion, ProfileStore, Reservation, Upsert};

const PROFILE_COLUMNS: &str = "id, event_id, address, username, avatar, role, score, tasks, \
     basename, basename_avatar, subname, email, created_at, updated_at";

const NOT_COMPLETED: &str =
    "COALESCE((tasks -> $3::text ->> 'isCompleted')::boolean, false) = false";

const NOT_PENDING: &str = "COALESCE((tasks -> $3::text ->> 'pending')::boolean, false) = false";

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    event_id: i64,
    address: String,
    username: Option<String>,
    avatar: Option<String>,
    role: String,
    score: i64,
    tasks: Json<TaskMap>,
    basename: Option<String>,
    basename_avatar: Option<String>,
    subname: Option<String>,
    email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = anyhow::Error;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let role: ProfileRole = row
            .role
            .parse()
            .map_err(|e| anyhow!("profile {}: {e}", row.id))?;
        Ok(Profile {
            id: row.id,
            event_id: row.event_id,
            address: row.address,
            username: row.username,
            avatar: row.avatar,
            role,
            score: row.score,
            tasks: row.tasks.0,
            basename: row.basename,
            basename_avatar: row.basename_avatar,
            subname: row.subname,
            email: row.email,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_profiles(rows: Vec<ProfileRow>) -> Result<Vec<Profile>> {
    rows.into_iter().map(Profile::try_from).collect()
}

impl Database {
    async fn profile_exists(&self, event_id: i64, address: &Address) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE event_id = $1 AND lower(address) = lower($2))",
        )
        .bind(event_id)
        .bind(address.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl ProfileStore for Database {
    async fn get_profile(&self, event_id: i64, address: &Address) -> Result<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE event_id = $1 AND lower(address) = lower($2)"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn create_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO users (event_id, address, username, avatar, role, score, tasks,
                                basename, basename_avatar, subname, email)
             VALUES ($1, $2, $3, $4, COALESCE($5, 'explorer'), COALESCE($6, 0),
                     COALESCE($7, '{{}}'::jsonb), $8, $9, $10, $11)
             ON CONFLICT (event_id, lower(address)) DO NOTHING
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .bind(&patch.username)
        .bind(&patch.avatar)
        .bind(patch.role.map(|r| r.as_str()))
        .bind(patch.score)
        .bind(patch.tasks.as_ref().map(Json))
        .bind(&patch.basename)
        .bind(&patch.basename_avatar)
        .bind(&patch.subname)
        .bind(&patch.email)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Profile::try_from(row),
            // Lost the race to a concurrent first load; return the winner's row.
            None => self
                .get_profile(event_id, address)
                .await?
                .ok_or_else(|| anyhow!("profile for {address} vanished after insert conflict")),
        }
    }

    async fn upsert_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Upsert> {
        let result = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO users (event_id, address, username, avatar, role, score, tasks,
                                basename, basename_avatar, subname, email)
             VALUES ($1, $2, $3, $4, COALESCE($5, 'explorer'), COALESCE($6, 0),
                     COALESCE($7, '{{}}'::jsonb), $8, $9, $10, $11)
             ON CONFLICT (event_id, lower(address)) DO UPDATE SET
               username = COALESCE($3, users.username),
               avatar = COALESCE($4, users.avatar),
               role = COALESCE($5, users.role),
               score = COALESCE($6, users.score),
               tasks = COALESCE($7, users.tasks),
               basename = COALESCE($8, users.basename),
               basename_avatar = COALESCE($9, users.basename_avatar),
               subname = COALESCE($10, users.subname),
               email = COALESCE($11, users.email),
               updated_at = NOW()
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .bind(&patch.username)
        .bind(&patch.avatar)
        .bind(patch.role.map(|r| r.as_str()))
        .bind(patch.score)
        .bind(patch.tasks.as_ref().map(Json))
        .bind(&patch.basename)
        .bind(&patch.basename_avatar)
        .bind(&patch.subname)
        .bind(&patch.email)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(Upsert::Saved(Profile::try_from(row)?)),
            Err(e) => match unique_violation(&e) {
                Some(field) => Ok(Upsert::Conflict(field)),
                None => Err(e.into()),
            },
        }
    }

    async fn delete_profile(&self, event_id: i64, address: &Address) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM users WHERE event_id = $1 AND lower(address) = lower($2)")
                .bind(event_id)
                .bind(address.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn complete_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        record: &TaskRecord,
        patch: &ProfilePatch,
    ) -> Result<Completion> {
        let points = if record.is_completed { record.points } else { 0 };
        let result = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE users SET
               tasks = jsonb_set(tasks, ARRAY[$3::text], $4::jsonb, true),
               score = score + $5,
               username = COALESCE($6, username),
               avatar = COALESCE($7, avatar),
               role = COALESCE($8, role),
               email = COALESCE($9, email),
               basename = COALESCE($10, basename),
               basename_avatar = COALESCE($11, basename_avatar),
               subname = COALESCE($12, subname),
               updated_at = NOW()
             WHERE event_id = $1 AND lower(address) = lower($2) AND {NOT_COMPLETED}
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .bind(task_id.to_string())
        .bind(Json(record))
        .bind(points)
        .bind(&patch.username)
        .bind(&patch.avatar)
        .bind(patch.role.map(|r| r.as_str()))
        .bind(&patch.email)
        .bind(&patch.basename)
        .bind(&patch.basename_avatar)
        .bind(&patch.subname)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => Ok(Completion::Completed(Profile::try_from(row)?)),
            Ok(None) => {
                if self.profile_exists(event_id, address).await? {
                    Ok(Completion::AlreadyCompleted)
                } else {
                    Ok(Completion::ProfileMissing)
                }
            }
            Err(e) => match unique_violation(&e) {
                Some(field) => Ok(Completion::Conflict(field)),
                None => Err(e.into()),
            },
        }
    }

    async fn reserve_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<Reservation> {
        let result = sqlx::query(&format!(
            "UPDATE users SET
               tasks = jsonb_set(tasks, ARRAY[$3::text], $4::jsonb, true),
               subname = COALESCE($5, subname),
               updated_at = NOW()
             WHERE event_id = $1 AND lower(address) = lower($2)
               AND {NOT_COMPLETED} AND {NOT_PENDING}"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .bind(task_id.to_string())
        .bind(Json(TaskRecord::reserved()))
        .bind(subname)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(Reservation::Reserved),
            Ok(_) => Ok(Reservation::Busy),
            Err(e) => match unique_violation(&e) {
                Some(field) => Ok(Reservation::Conflict(field)),
                None => Err(e.into()),
            },
        }
    }

    async fn release_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE users SET
               tasks = tasks - $3::text,
               subname = CASE WHEN lower(subname) = lower($4) THEN NULL ELSE subname END,
               updated_at = NOW()
             WHERE event_id = $1 AND lower(address) = lower($2)
               AND {NOT_COMPLETED}
               AND COALESCE((tasks -> $3::text ->> 'pending')::boolean, false) = true"
        ))
        .bind(event_id)
        .bind(address.as_str())
        .bind(task_id.to_string())
        .bind(subname)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn username_owner(&self, event_id: i64, username: &str) -> Result<Option<String>> {
        let owner = sqlx::query_scalar(
            "SELECT address FROM users WHERE event_id = $1 AND lower(username) = lower($2)",
        )
        .bind(event_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner)
    }

    async fn subname_taken(&self, subname: &str) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE lower(subname) = lower($1))",
        )
        .bind(subname)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn leaderboard(&self, event_id: i64, limit: i64) -> Result<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE event_id = $1
             ORDER BY score DESC, created_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(event_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        into_profiles(rows)
    }

    async fn list_profiles(&self, event_id: i64) -> Result<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE event_id = $1 ORDER BY id"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        into_profiles(rows)
    }

    async fn set_score(&self, profile_id: i64, score: i64) -> Result<()> {
        sqlx::query("UPDATE users SET score = $2, updated_at = NOW() WHERE id = $1")
            .bind(profile_id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
