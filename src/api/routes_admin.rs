//! Admin endpoints: ticket issuance, ticket listing, profile reset.
//!
//! Every request carries `{address, signature}`. The address must be on the
//! `[admin]` allowlist and the signature must verify over `admin.message`;
//! otherwise the request is refused with 403 before any other work.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::AppState;
use crate::error::ApiError;
use crate::profile::Address;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AdminAuth {
    address: String,
    signature: String,
}

/// Resolve the caller to an allowlisted, signature-verified admin address.
async fn require_admin(state: &AppState, auth: &AdminAuth) -> Result<Address, ApiError> {
    let address =
        Address::parse(&auth.address).map_err(|_| ApiError::forbidden("Unauthorized"))?;
    if !state.admins.contains(&address) {
        warn!(address = %address, "admin request from non-allowlisted address");
        return Err(ApiError::forbidden("Unauthorized"));
    }
    let valid = state
        .evaluator
        .verifier()
        .verify_signature(&address, &state.config.admin.message, &auth.signature)
        .await
        .map_err(|e| {
            warn!(error = %e, "admin signature check failed");
            ApiError::External("Verification service unavailable".to_string())
        })?;
    if !valid {
        warn!(address = %address, "admin signature rejected");
        return Err(ApiError::forbidden("Unauthorized"));
    }
    Ok(address)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IssueRequest {
    #[serde(flatten)]
    auth: AdminAuth,
    event_id: i64,
    count: u32,
}

pub(super) async fn handler_admin_tickets_issue(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let admin = require_admin(&state, &req.auth).await?;
    let codes = state
        .tickets
        .issue(state.store.as_ref(), req.event_id, req.count)
        .await?;
    state.prom_metrics.tickets_issued.inc_by(codes.len() as u64);
    info!(admin = %admin, event_id = req.event_id, count = codes.len(), "admin issued tickets");
    Ok(Json(json!({ "tickets": codes })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventScopedRequest {
    #[serde(flatten)]
    auth: AdminAuth,
    event_id: i64,
}

pub(super) async fn handler_admin_tickets_list(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EventScopedRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    require_admin(&state, &req.auth).await?;
    let tickets = state
        .tickets
        .list(state.store.as_ref(), req.event_id)
        .await?;
    Ok(Json(json!({ "tickets": tickets })))
}

/// Delete the calling admin's own profile so they can replay the event.
pub(super) async fn handler_admin_reset_profile(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EventScopedRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let admin = require_admin(&state, &req.auth).await?;
    let deleted = state.store.delete_profile(req.event_id, &admin).await?;
    info!(admin = %admin, event_id = req.event_id, deleted, "admin profile reset");
    Ok(Json(json!({ "deleted": deleted })))
}
