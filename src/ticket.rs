//! # Ticket Registry
//!
//! Tickets are six-character uppercase alphanumeric codes scoped to an event.
//! A ticket moves from *available* (unbound, unused) to *claimed* (bound to a
//! profile, used) exactly once; there is no way back.
//!
//! ## Issuance
//!
//! Codes are drawn from a 36-symbol alphabet (36^6 ≈ 2.2 billion codes), unique
//! within the batch, then filtered against codes already stored and inserted
//! with conflict-skipping. Whatever the unique index rejects (a concurrent admin
//! issuing the same code) is regenerated, for at most [`MAX_ISSUE_ROUNDS`]
//! rounds.
//!
//! ## Association
//!
//! Binding is one guarded write in the store (see [`TicketStore`]). The
//! on-chain attestation that follows is advisory: its failure is logged and
//! leaves `attestationTxLink` null, but the association stands.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::gateway::ChainWriter;
use crate::profile::Address;
use crate::store::{Association, Store, Ticket, TicketOwner};

pub const CODE_LEN: usize = 6;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const MAX_ISSUE_ROUNDS: usize = 10;

/// Trim and upper-case a user-supplied code, rejecting anything that is not
/// six ASCII alphanumerics.
pub fn normalize_code(raw: &str) -> Result<String, ApiError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ApiError::validation("Invalid ticket code"));
    }
    Ok(code)
}

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// `count` distinct codes, none of which appear in `exclude`.
pub fn generate_batch<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    exclude: &HashSet<String>,
) -> Vec<String> {
    let mut seen = HashSet::with_capacity(count);
    let mut batch = Vec::with_capacity(count);
    while batch.len() < count {
        let code = generate_code(rng);
        if exclude.contains(&code) || !seen.insert(code.clone()) {
            continue;
        }
        batch.push(code);
    }
    batch
}

/// Read-only ticket status for QR previews.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    /// Redeemable: the ticket exists and has not been used.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_owner: Option<TicketOwner>,
    pub is_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

/// Result of a successful association.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationReceipt {
    pub ticket_code: String,
    pub user_id: i64,
    pub attestation_tx_link: Option<String>,
}

pub struct TicketRegistry {
    chain: Arc<dyn ChainWriter>,
    attest: bool,
    max_batch: u32,
}

impl TicketRegistry {
    pub fn new(chain: Arc<dyn ChainWriter>, attest: bool, max_batch: u32) -> Self {
        TicketRegistry {
            chain,
            attest,
            max_batch,
        }
    }

    pub fn attests(&self) -> bool {
        self.attest
    }

    /// Generate and persist `count` new tickets for an event.
    pub async fn issue(
        &self,
        store: &dyn Store,
        event_id: i64,
        count: u32,
    ) -> Result<Vec<String>, ApiError> {
        if count == 0 || count > self.max_batch {
            return Err(ApiError::validation(format!(
                "Count must be between 1 and {}",
                self.max_batch
            )));
        }
        if store.get_event(event_id).await?.is_none() {
            return Err(ApiError::not_found("Event not found"));
        }

        let count = count as usize;
        let mut issued: Vec<String> = Vec::with_capacity(count);
        let mut tried: HashSet<String> = HashSet::new();
        for round in 0..MAX_ISSUE_ROUNDS {
            let needed = count - issued.len();
            if needed == 0 {
                break;
            }
            let batch = {
                let mut rng = rand::rng();
                generate_batch(&mut rng, needed, &tried)
            };
            tried.extend(batch.iter().cloned());

            let existing: HashSet<String> =
                store.existing_codes(&batch).await?.into_iter().collect();
            let fresh: Vec<String> = batch
                .into_iter()
                .filter(|c| !existing.contains(c))
                .collect();
            let inserted = store.insert_tickets(event_id, &fresh).await?;
            if inserted.len() < needed {
                warn!(
                    event_id,
                    round,
                    collisions = needed - inserted.len(),
                    "ticket code collisions, regenerating"
                );
            }
            issued.extend(inserted);
        }

        if issued.len() < count {
            return Err(ApiError::Internal(anyhow!(
                "could only issue {} of {} tickets after {} rounds",
                issued.len(),
                count,
                MAX_ISSUE_ROUNDS
            )));
        }
        info!(event_id, count, "tickets issued");
        Ok(issued)
    }

    /// Look up a ticket without changing it.
    pub async fn validate(
        &self,
        store: &dyn Store,
        event_id: i64,
        raw_code: &str,
    ) -> Result<TicketView, ApiError> {
        let code = normalize_code(raw_code)?;
        let found = store
            .find_ticket(event_id, &code)
            .await?
            .ok_or_else(|| ApiError::not_found("Ticket not found"))?;
        Ok(TicketView {
            valid: !found.ticket.is_used,
            ticket_owner: found.owner,
            is_used: found.ticket.is_used,
            used_at: found.ticket.used_at,
        })
    }

    /// Bind a ticket to the profile of `address` and consume it.
    pub async fn associate(
        &self,
        store: &dyn Store,
        event_id: i64,
        raw_code: &str,
        address: &Address,
    ) -> Result<AssociationReceipt, ApiError> {
        let code = normalize_code(raw_code)?;
        if store.get_event(event_id).await?.is_none() {
            return Err(ApiError::not_found("Event not found"));
        }

        let ticket = match store.associate_ticket(event_id, &code, address).await? {
            Association::Claimed(ticket) => ticket,
            Association::UserNotFound => return Err(ApiError::not_found("User not found")),
            Association::UserHasTicket => {
                return Err(ApiError::conflict(
                    "User already has a ticket for this event",
                ))
            }
            Association::TicketNotFound => return Err(ApiError::not_found("Ticket not found")),
            Association::AlreadyUsed => return Err(ApiError::conflict("Ticket already used")),
            Association::OwnedByOther => {
                return Err(ApiError::conflict("Ticket belongs to another user"))
            }
        };
        info!(event_id, ticket_id = ticket.id, address = %address, "ticket associated");

        let attestation_tx_link = if self.attest {
            self.attest_best_effort(store, &ticket, address).await
        } else {
            None
        };

        Ok(AssociationReceipt {
            ticket_code: ticket.code,
            user_id: ticket.user_id.unwrap_or_default(),
            attestation_tx_link,
        })
    }

    async fn attest_best_effort(
        &self,
        store: &dyn Store,
        ticket: &Ticket,
        address: &Address,
    ) -> Option<String> {
        let receipt = match self
            .chain
            .attest_ticket(address, ticket.event_id, &ticket.code)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(ticket_id = ticket.id, error = %e, "ticket attestation failed");
                return None;
            }
        };
        if let Err(e) = store
            .set_attestation_link(ticket.id, &receipt.tx_link)
            .await
        {
            warn!(ticket_id = ticket.id, error = %e, "failed to record attestation link");
        }
        Some(receipt.tx_link)
    }

    pub async fn list(&self, store: &dyn Store, event_id: i64) -> Result<Vec<Ticket>, ApiError> {
        Ok(store.list_tickets(event_id).await?)
    }
}
