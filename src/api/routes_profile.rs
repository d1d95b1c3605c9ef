//! Profile, quest claim and leaderboard endpoints.
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /api/profile?address=&eventId=` | Load (or create on first visit) a profile |
//! | `PATCH /api/profile` | Edit username, avatar, role, email |
//! | `POST /api/profile/claim` | Complete a quest |
//! | `GET /api/leaderboard?eventId=&limit=` | Public profile fields by score |

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;
use crate::profile::{Address, LeaderboardEntry, Profile, TaskId};
use crate::quest::{ClaimPayload, ProfileEdit};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProfileQuery {
    address: String,
    event_id: i64,
}

pub(super) async fn handler_profile_get(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProfileQuery>, QueryRejection>,
) -> Result<Json<Profile>, ApiError> {
    let Query(query) = query?;
    let address = Address::parse(&query.address)?;
    let (_, catalog) = state.catalog(query.event_id).await?;
    let profile = state
        .evaluator
        .ensure_profile(state.store.as_ref(), &catalog, &address)
        .await?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProfilePatchRequest {
    address: String,
    event_id: i64,
    #[serde(flatten)]
    edit: ProfileEdit,
}

pub(super) async fn handler_profile_patch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ProfilePatchRequest>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let Json(req) = body?;
    let address = Address::parse(&req.address)?;
    state.catalog(req.event_id).await?;
    let profile = state
        .evaluator
        .edit_profile(state.store.as_ref(), req.event_id, &address, &req.edit)
        .await?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ClaimRequest {
    address: String,
    event_id: i64,
    task_id: Value,
    #[serde(default)]
    payload: ClaimPayload,
}

pub(super) async fn handler_profile_claim(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let address = Address::parse(&req.address)?;
    let task_id = parse_task_id(&req.task_id)?;
    let (_, catalog) = state.catalog(req.event_id).await?;
    let action = catalog
        .get(task_id)
        .map(|t| t.action.as_str())
        .unwrap_or("unknown");

    let result = state
        .evaluator
        .evaluate(
            state.store.as_ref(),
            &catalog,
            &address,
            task_id,
            &req.payload,
        )
        .await;
    match result {
        Ok(profile) => {
            state.prom_metrics.quest_completed(action);
            Ok(Json(json!({ "profile": profile })))
        }
        Err(e) => {
            state.prom_metrics.quest_rejected(action, e.kind());
            Err(e)
        }
    }
}

/// Task ids arrive as JSON numbers or numeric strings. Anything that is not a
/// non-negative integer in range is an unknown task.
fn parse_task_id(raw: &Value) -> Result<TaskId, ApiError> {
    let id = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.and_then(|id| TaskId::try_from(id).ok())
        .ok_or_else(|| ApiError::validation("Invalid task"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LeaderboardQuery {
    event_id: i64,
    #[serde(default)]
    limit: Option<i64>,
}

pub(super) async fn handler_leaderboard(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let Query(query) = query?;
    state.catalog(query.event_id).await?;
    let max = state.config.server.leaderboard_limit;
    let limit = query.limit.unwrap_or(max).clamp(1, max);
    let profiles = state.store.leaderboard(query.event_id, limit).await?;
    Ok(Json(profiles.into_iter().map(LeaderboardEntry::from).collect()))
}
