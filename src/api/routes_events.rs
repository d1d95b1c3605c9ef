//! Event summary with its parsed quest catalog.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;

/// `GET /api/events/{id}`: event content plus the normalised task list, so
/// clients see the same task ids the evaluator uses.
pub(super) async fn handler_event_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let (event, catalog) = state.catalog(id).await?;
    Ok(Json(json!({
        "id": event.id,
        "name": event.name,
        "isArchived": event.is_archived,
        "languages": event.languages(),
        "config": event.config,
        "dataEn": event.data_en,
        "dataTr": event.data_tr,
        "socials": event.socials,
        "tasks": catalog.tasks(),
    })))
}
