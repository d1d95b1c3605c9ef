//! Ticket preview and redemption endpoints.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::profile::Address;
use crate::ticket::{AssociationReceipt, TicketView};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TicketQuery {
    event_id: i64,
}

/// `GET /api/ticket/{code}?eventId=`: read-only status for QR previews.
pub(super) async fn handler_ticket_get(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    query: Result<Query<TicketQuery>, QueryRejection>,
) -> Result<Json<TicketView>, ApiError> {
    let Query(query) = query?;
    let view = state
        .tickets
        .validate(state.store.as_ref(), query.event_id, &code)
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AssociateRequest {
    address: String,
    event_id: i64,
    ticket_code: String,
}

/// `POST /api/ticket/associate`: bind a ticket to the caller's profile.
pub(super) async fn handler_ticket_associate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AssociateRequest>, JsonRejection>,
) -> Result<Json<AssociationReceipt>, ApiError> {
    let Json(req) = body?;
    let address = Address::parse(&req.address)?;
    let receipt = state
        .tickets
        .associate(state.store.as_ref(), req.event_id, &req.ticket_code, &address)
        .await?;

    state.prom_metrics.tickets_associated.inc();
    if state.tickets.attests() && receipt.attestation_tx_link.is_none() {
        state.prom_metrics.attestation_failures.inc();
    }
    Ok(Json(receipt))
}
