//! # Quest Evaluator — Task Completion State Machine
//!
//! Decides whether an attendee may complete a quest and, if so, writes the
//! completed task record and the new score in one guarded store operation.
//!
//! ## Generic checks
//!
//! Every claim runs these first, in order, and stops at the first failure:
//!
//! 1. the task id exists in the event catalog ("Invalid task");
//! 2. the action has a handler ("Task not available yet.");
//! 3. the profile exists ("Profile not found");
//! 4. the task is not already completed ("Task already completed");
//! 5. the task's `lock` prerequisite, if any, is completed.
//!
//! ## Proof and chain failures
//!
//! A verifier that answers "no" yields [`ApiError::Rejected`]. A verifier that
//! cannot be reached yields [`ApiError::External`] so clients can retry. Neither
//! mutates the profile.
//!
//! ## On-chain actions
//!
//! `claim-tokens` and `claim-subname` spend gas. They first *reserve* the task
//! (a pending record, guarded by "not completed and not pending"), then call
//! the chain writer, then complete the task with the transaction link. A
//! failed write releases the reservation. If the write succeeds but the
//! completion cannot be recorded, the task stays pending and the transaction
//! link is logged for manual repair; it is never retried automatically.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::catalog::{EventCatalog, TaskAction, TaskDefinition};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::gateway::{ChainWriter, ProofVerifier};
use crate::profile::{
    validate_username, Address, Profile, ProfilePatch, ProfileRole, TaskMap, TaskRecord,
};
use crate::score;
use crate::store::{Completion, Reservation, Store, Upsert};

/// Quest rules taken from the `[quests]` config section.
#[derive(Debug, Clone)]
pub struct QuestPolicy {
    pub enforce_locks: bool,
    pub claim_message: String,
    pub reserved_subnames: HashSet<String>,
    pub subname_parent: String,
    pub payout_wei: String,
}

impl QuestPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        QuestPolicy {
            enforce_locks: config.quests.enforce_locks,
            claim_message: config.quests.claim_message.clone(),
            reserved_subnames: config.reserved_subnames(),
            subname_parent: config.quests.subname_parent.clone(),
            payout_wei: config.quests.payout_wei.clone(),
        }
    }
}

impl Default for QuestPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Action-specific input sent with a claim. Unused fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimPayload {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<String>,
    pub email: Option<String>,
    pub subname: Option<String>,
    pub signature: Option<String>,
}

/// Fields an attendee may edit outside of quest completion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileEdit {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<String>,
    pub email: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn taken(field: &str) -> ApiError {
    match field {
        "subname" => ApiError::conflict("Subname already taken"),
        _ => ApiError::conflict("Username already taken"),
    }
}

fn verifier_unavailable(e: anyhow::Error) -> ApiError {
    warn!(error = %e, "verifier call failed");
    ApiError::External("Verification service unavailable".to_string())
}

fn complete_first(task: &TaskDefinition) -> ApiError {
    ApiError::rejected(format!("Complete \"{}\" first", task.name))
}

/// Subname labels are 3-32 characters of `[a-z0-9-]`, not starting or ending
/// with `-`. Expects an already lowercased label.
pub fn validate_subname_label(label: &str) -> Result<(), ApiError> {
    let valid = (3..=32).contains(&label.len())
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid subname"))
    }
}

pub struct QuestEvaluator {
    verifier: Arc<dyn ProofVerifier>,
    chain: Arc<dyn ChainWriter>,
    policy: QuestPolicy,
}

impl QuestEvaluator {
    pub fn new(
        verifier: Arc<dyn ProofVerifier>,
        chain: Arc<dyn ChainWriter>,
        policy: QuestPolicy,
    ) -> Self {
        QuestEvaluator {
            verifier,
            chain,
            policy,
        }
    }

    pub fn verifier(&self) -> &Arc<dyn ProofVerifier> {
        &self.verifier
    }

    /// Load the profile, creating it on first visit with the event's
    /// connect-wallet task pre-completed.
    pub async fn ensure_profile(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        address: &Address,
    ) -> Result<Profile, ApiError> {
        if let Some(profile) = store.get_profile(catalog.event_id, address).await? {
            return Ok(profile);
        }
        let mut tasks = TaskMap::new();
        if let Some(connect) = catalog.connect_wallet_task() {
            tasks.insert(connect.id, TaskRecord::completed(connect.points));
        }
        let patch = ProfilePatch {
            score: Some(score::total(&tasks)),
            tasks: Some(tasks),
            ..Default::default()
        };
        let profile = store
            .create_profile(catalog.event_id, address, &patch)
            .await?;
        info!(
            event_id = catalog.event_id,
            address = %address,
            score = profile.score,
            "profile created"
        );
        Ok(profile)
    }

    /// Update username, avatar, role or email on an existing profile.
    pub async fn edit_profile(
        &self,
        store: &dyn Store,
        event_id: i64,
        address: &Address,
        edit: &ProfileEdit,
    ) -> Result<Profile, ApiError> {
        let profile = store
            .get_profile(event_id, address)
            .await?
            .ok_or_else(|| ApiError::not_found("Profile not found"))?;

        let mut patch = ProfilePatch::default();
        if let Some(username) = non_empty(&edit.username) {
            self.check_username(store, event_id, address, username).await?;
            patch.username = Some(username.to_string());
        }
        patch.avatar = non_empty(&edit.avatar).map(str::to_string);
        patch.email = non_empty(&edit.email).map(str::to_string);
        patch.role = non_empty(&edit.role)
            .map(str::parse::<ProfileRole>)
            .transpose()?;
        if patch.is_empty() {
            return Ok(profile);
        }

        match store.upsert_profile(event_id, address, &patch).await? {
            Upsert::Saved(profile) => Ok(profile),
            Upsert::Conflict(field) => Err(taken(field)),
        }
    }

    /// Evaluate a claim for `task_id` and persist the completion.
    pub async fn evaluate(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        address: &Address,
        task_id: u32,
        payload: &ClaimPayload,
    ) -> Result<Profile, ApiError> {
        let task = catalog
            .get(task_id)
            .ok_or_else(|| ApiError::validation("Invalid task"))?;
        if task.action == TaskAction::Unsupported {
            return Err(ApiError::validation("Task not available yet."));
        }
        let profile = store
            .get_profile(catalog.event_id, address)
            .await?
            .ok_or_else(|| ApiError::not_found("Profile not found"))?;
        if profile.is_completed(task.id) {
            return Err(ApiError::conflict("Task already completed"));
        }
        if self.policy.enforce_locks {
            if let Some(lock) = task.lock {
                if !profile.is_completed(lock) {
                    return Err(match catalog.get(lock) {
                        Some(prerequisite) => complete_first(prerequisite),
                        None => ApiError::rejected("Complete the previous task first"),
                    });
                }
            }
        }

        match task.action {
            TaskAction::ConnectWallet => Err(ApiError::conflict("Task already completed")),
            TaskAction::SetupProfile => {
                self.setup_profile(store, catalog, &profile, address, task, payload)
                    .await
            }
            TaskAction::ClaimPoap => {
                let poap_id = task.condition.as_deref().ok_or_else(|| {
                    ApiError::Internal(anyhow!("task {} has no POAP id", task.id))
                })?;
                let owned = self
                    .verifier
                    .verify_poap(address, poap_id)
                    .await
                    .map_err(verifier_unavailable)?;
                if !owned {
                    return Err(ApiError::rejected("POAP not found for this address"));
                }
                let record = TaskRecord::completed(task.points);
                self.complete(store, catalog, address, task, record, ProfilePatch::default())
                    .await
            }
            TaskAction::ClickLink => {
                let record = TaskRecord::completed(task.points);
                self.complete(store, catalog, address, task, record, ProfilePatch::default())
                    .await
            }
            TaskAction::SwapTokens => {
                let condition = task.condition.as_deref().ok_or_else(|| {
                    ApiError::Internal(anyhow!("task {} has no swap condition", task.id))
                })?;
                let verified = self
                    .verifier
                    .verify_swap(address, condition)
                    .await
                    .map_err(verifier_unavailable)?;
                if !verified {
                    return Err(ApiError::rejected("Swap not found for this address"));
                }
                let record = TaskRecord::completed(task.points);
                self.complete(store, catalog, address, task, record, ProfilePatch::default())
                    .await
            }
            TaskAction::OwnBasename => {
                let found = self
                    .verifier
                    .lookup_basename(address, task.condition.as_deref())
                    .await
                    .map_err(verifier_unavailable)?;
                let Some(basename) = found else {
                    return Err(ApiError::rejected("No basename found for this address"));
                };
                let patch = ProfilePatch {
                    basename: Some(basename.name),
                    basename_avatar: basename.avatar,
                    ..Default::default()
                };
                let record = TaskRecord::completed(task.points);
                self.complete(store, catalog, address, task, record, patch)
                    .await
            }
            TaskAction::ClaimTokens => {
                self.claim_tokens(store, catalog, &profile, address, task)
                    .await
            }
            TaskAction::ClaimSubname => {
                self.claim_subname(store, catalog, &profile, address, task, payload)
                    .await
            }
            TaskAction::Unsupported => Err(ApiError::validation("Task not available yet.")),
        }
    }

    async fn check_username(
        &self,
        store: &dyn Store,
        event_id: i64,
        address: &Address,
        username: &str,
    ) -> Result<(), ApiError> {
        validate_username(username)?;
        if let Some(owner) = store.username_owner(event_id, username).await? {
            if !owner.eq_ignore_ascii_case(address.as_str()) {
                return Err(ApiError::conflict("Username already taken"));
            }
        }
        Ok(())
    }

    async fn setup_profile(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        profile: &Profile,
        address: &Address,
        task: &TaskDefinition,
        payload: &ClaimPayload,
    ) -> Result<Profile, ApiError> {
        let mut patch = ProfilePatch::default();
        match non_empty(&payload.username) {
            Some(username) => {
                self.check_username(store, profile.event_id, address, username)
                    .await?;
                patch.username = Some(username.to_string());
            }
            None if profile.username.is_none() => {
                return Err(ApiError::validation("Username is required"));
            }
            None => {}
        }
        patch.avatar = non_empty(&payload.avatar).map(str::to_string);
        patch.email = non_empty(&payload.email).map(str::to_string);
        patch.role = non_empty(&payload.role)
            .map(str::parse::<ProfileRole>)
            .transpose()?;

        let record = TaskRecord::completed(task.points);
        self.complete(store, catalog, address, task, record, patch)
            .await
    }

    async fn claim_tokens(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        profile: &Profile,
        address: &Address,
        task: &TaskDefinition,
    ) -> Result<Profile, ApiError> {
        let linked = catalog
            .linked_task(task)
            .ok_or_else(|| ApiError::validation("Task not available yet."))?;
        if !profile.is_completed(linked.id) {
            return Err(complete_first(linked));
        }

        self.reserve(store, catalog.event_id, address, task, None)
            .await?;
        let receipt = match self
            .chain
            .send_payout(address, &self.policy.payout_wei)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    event_id = catalog.event_id,
                    address = %address,
                    error = %e,
                    "token payout failed"
                );
                self.release(store, catalog.event_id, address, task, None)
                    .await;
                return Err(ApiError::External("Transaction failed".to_string()));
            }
        };
        info!(
            event_id = catalog.event_id,
            address = %address,
            tx_link = %receipt.tx_link,
            "token payout sent"
        );

        let record = TaskRecord::completed(task.points).with_tx_link(receipt.tx_link.clone());
        self.complete(store, catalog, address, task, record, ProfilePatch::default())
            .await
            .inspect_err(|e| {
                error!(
                    task_id = task.id,
                    address = %address,
                    tx_link = %receipt.tx_link,
                    error = %e,
                    "payout sent but completion not recorded, task left pending"
                );
            })
    }

    async fn claim_subname(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        profile: &Profile,
        address: &Address,
        task: &TaskDefinition,
        payload: &ClaimPayload,
    ) -> Result<Profile, ApiError> {
        let label = non_empty(&payload.subname)
            .ok_or_else(|| ApiError::validation("Subname is required"))?
            .to_ascii_lowercase();
        // Reserved names are refused before any other check.
        if self.policy.reserved_subnames.contains(&label) {
            return Err(ApiError::conflict("Subname is reserved"));
        }
        validate_subname_label(&label)?;

        let signature = non_empty(&payload.signature)
            .ok_or_else(|| ApiError::validation("Signature is required"))?;
        let signed = self
            .verifier
            .verify_signature(address, &self.policy.claim_message, signature)
            .await
            .map_err(verifier_unavailable)?;
        if !signed {
            return Err(ApiError::rejected("Invalid signature"));
        }

        let full_name = format!("{label}.{}", self.policy.subname_parent);
        if store.subname_taken(&full_name).await? {
            return Err(ApiError::conflict("Subname already taken"));
        }
        if let Some(linked) = catalog.linked_task(task) {
            if !profile.is_completed(linked.id) {
                return Err(complete_first(linked));
            }
        }

        // The name is written with the reservation, so a concurrent claim for
        // the same label loses here, before anything is sent on-chain.
        self.reserve(store, catalog.event_id, address, task, Some(&full_name))
            .await?;
        let receipt = match self
            .chain
            .register_subname(address, &label, &self.policy.subname_parent)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    event_id = catalog.event_id,
                    address = %address,
                    subname = %full_name,
                    error = %e,
                    "subname registration failed"
                );
                self.release(store, catalog.event_id, address, task, Some(&full_name))
                    .await;
                return Err(ApiError::External("Transaction failed".to_string()));
            }
        };
        info!(
            event_id = catalog.event_id,
            address = %address,
            subname = %full_name,
            "subname registered"
        );

        let record = TaskRecord::completed(task.points).with_tx_link(receipt.tx_link.clone());
        let patch = ProfilePatch {
            subname: Some(full_name),
            ..Default::default()
        };
        self.complete(store, catalog, address, task, record, patch)
            .await
            .inspect_err(|e| {
                error!(
                    task_id = task.id,
                    address = %address,
                    tx_link = %receipt.tx_link,
                    error = %e,
                    "subname registered but completion not recorded, task left pending"
                );
            })
    }

    async fn reserve(
        &self,
        store: &dyn Store,
        event_id: i64,
        address: &Address,
        task: &TaskDefinition,
        subname: Option<&str>,
    ) -> Result<(), ApiError> {
        match store
            .reserve_task(event_id, address, task.id, subname)
            .await?
        {
            Reservation::Reserved => Ok(()),
            Reservation::Busy => Err(ApiError::conflict("Task already in progress")),
            Reservation::Conflict(field) => Err(taken(field)),
        }
    }

    async fn release(
        &self,
        store: &dyn Store,
        event_id: i64,
        address: &Address,
        task: &TaskDefinition,
        subname: Option<&str>,
    ) {
        if let Err(e) = store
            .release_task(event_id, address, task.id, subname)
            .await
        {
            error!(
                event_id,
                task_id = task.id,
                address = %address,
                error = %e,
                "failed to release task reservation"
            );
        }
    }

    async fn complete(
        &self,
        store: &dyn Store,
        catalog: &EventCatalog,
        address: &Address,
        task: &TaskDefinition,
        record: TaskRecord,
        patch: ProfilePatch,
    ) -> Result<Profile, ApiError> {
        let event_id = catalog.event_id;
        match store
            .complete_task(event_id, address, task.id, &record, &patch)
            .await?
        {
            Completion::Completed(profile) => {
                if let Some((stored, computed)) = score::drift(&profile) {
                    warn!(profile_id = profile.id, stored, computed, "score drift detected");
                }
                info!(
                    event_id,
                    task_id = task.id,
                    action = task.action.as_str(),
                    address = %address,
                    score = profile.score,
                    "task completed"
                );
                Ok(profile)
            }
            Completion::AlreadyCompleted => Err(ApiError::conflict("Task already completed")),
            Completion::ProfileMissing => Err(ApiError::not_found("Profile not found")),
            Completion::Conflict(field) => Err(taken(field)),
        }
    }
}
