//! In-process store for local development (`serve --memory`) and tests.
//!
//! All state sits behind one mutex and every trait method completes under a
//! single lock acquisition, which gives the same atomicity the Postgres
//! implementation gets from conditional updates. Nothing is persisted.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{
    Association, Completion, EventStore, ProfileStore, Reservation, Store, Ticket, TicketOwner,
    TicketStore, TicketWithOwner, Upsert,
};
use crate::catalog::{Event, EventImport};
use crate::profile::{Address, Profile, ProfilePatch, TaskId, TaskRecord};

#[derive(Default)]
struct Inner {
    events: BTreeMap<i64, Event>,
    profiles: BTreeMap<i64, Profile>,
    tickets: BTreeMap<i64, Ticket>,
    next_event_id: i64,
    next_profile_id: i64,
    next_ticket_id: i64,
}

impl Inner {
    fn profile_id(&self, event_id: i64, address: &Address) -> Option<i64> {
        self.profiles
            .values()
            .find(|p| p.event_id == event_id && p.address.eq_ignore_ascii_case(address.as_str()))
            .map(|p| p.id)
    }

    /// First unique field in `patch` already held by another profile.
    fn patch_conflict(
        &self,
        event_id: i64,
        self_id: Option<i64>,
        patch: &ProfilePatch,
    ) -> Option<&'static str> {
        let others = || self.profiles.values().filter(move |p| Some(p.id) != self_id);
        if let Some(ref username) = patch.username {
            let taken = others().any(|p| {
                p.event_id == event_id
                    && p.username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(username))
            });
            if taken {
                return Some("username");
            }
        }
        if let Some(ref subname) = patch.subname {
            let taken = others().any(|p| {
                p.subname
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(subname))
            });
            if taken {
                return Some("subname");
            }
        }
        None
    }

    fn insert_profile(
        &mut self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Profile> {
        if !self.events.contains_key(&event_id) {
            bail!("event {event_id} does not exist");
        }
        self.next_profile_id += 1;
        let now = Utc::now();
        let mut profile = Profile {
            id: self.next_profile_id,
            event_id,
            address: address.to_string(),
            username: None,
            avatar: None,
            role: Default::default(),
            score: 0,
            tasks: Default::default(),
            basename: None,
            basename_avatar: None,
            subname: None,
            email: None,
            created_at: now,
            updated_at: now,
        };
        patch.apply_to(&mut profile);
        self.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    fn owner_of(&self, ticket: &Ticket) -> Option<TicketOwner> {
        let user_id = ticket.user_id?;
        self.profiles.get(&user_id).map(|p| TicketOwner {
            address: p.address.clone(),
            username: p.username.clone(),
            avatar: p.avatar.clone(),
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an event, replacing any event with the same id. Returns the id.
    pub fn add_event(&self, import: &EventImport) -> i64 {
        let mut inner = self.lock();
        let id = match import.id {
            Some(id) => id,
            None => inner.next_event_id + 1,
        };
        inner.next_event_id = inner.next_event_id.max(id);
        let now = Utc::now();
        inner.events.insert(
            id,
            Event {
                id,
                name: import.name.clone(),
                config: import.config.clone(),
                data_en: import.data_en.clone(),
                data_tr: import.data_tr.clone(),
                socials: import.socials.clone(),
                is_archived: import.is_archived,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get_event(&self, event_id: i64) -> Result<Option<Event>> {
        Ok(self.lock().events.get(&event_id).cloned())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, event_id: i64, address: &Address) -> Result<Option<Profile>> {
        let inner = self.lock();
        Ok(inner
            .profile_id(event_id, address)
            .and_then(|id| inner.profiles.get(&id).cloned()))
    }

    async fn create_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Profile> {
        let mut inner = self.lock();
        if let Some(id) = inner.profile_id(event_id, address) {
            if let Some(existing) = inner.profiles.get(&id) {
                return Ok(existing.clone());
            }
        }
        inner.insert_profile(event_id, address, patch)
    }

    async fn upsert_profile(
        &self,
        event_id: i64,
        address: &Address,
        patch: &ProfilePatch,
    ) -> Result<Upsert> {
        let mut inner = self.lock();
        let existing = inner.profile_id(event_id, address);
        if let Some(field) = inner.patch_conflict(event_id, existing, patch) {
            return Ok(Upsert::Conflict(field));
        }
        if let Some(profile) = existing.and_then(|id| inner.profiles.get_mut(&id)) {
            patch.apply_to(profile);
            profile.updated_at = Utc::now();
            return Ok(Upsert::Saved(profile.clone()));
        }
        Ok(Upsert::Saved(inner.insert_profile(event_id, address, patch)?))
    }

    async fn delete_profile(&self, event_id: i64, address: &Address) -> Result<u64> {
        let mut inner = self.lock();
        let doomed: Vec<i64> = inner
            .profiles
            .values()
            .filter(|p| p.event_id == event_id && p.address.eq_ignore_ascii_case(address.as_str()))
            .map(|p| p.id)
            .collect();
        for id in &doomed {
            inner.profiles.remove(id);
            for ticket in inner.tickets.values_mut() {
                if ticket.user_id == Some(*id) {
                    ticket.user_id = None;
                }
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn complete_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        record: &TaskRecord,
        patch: &ProfilePatch,
    ) -> Result<Completion> {
        let mut inner = self.lock();
        let Some(id) = inner.profile_id(event_id, address) else {
            return Ok(Completion::ProfileMissing);
        };
        if inner.profiles.get(&id).is_some_and(|p| p.is_completed(task_id)) {
            return Ok(Completion::AlreadyCompleted);
        }
        if let Some(field) = inner.patch_conflict(event_id, Some(id), patch) {
            return Ok(Completion::Conflict(field));
        }
        let Some(profile) = inner.profiles.get_mut(&id) else {
            return Ok(Completion::ProfileMissing);
        };
        patch.apply_to(profile);
        profile.tasks.insert(task_id, record.clone());
        if record.is_completed {
            profile.score += record.points;
        }
        profile.updated_at = Utc::now();
        Ok(Completion::Completed(profile.clone()))
    }

    async fn reserve_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<Reservation> {
        let mut inner = self.lock();
        let Some(id) = inner.profile_id(event_id, address) else {
            return Ok(Reservation::Busy);
        };
        let patch = ProfilePatch {
            subname: subname.map(str::to_string),
            ..Default::default()
        };
        let conflict = inner.patch_conflict(event_id, Some(id), &patch);
        let Some(profile) = inner.profiles.get_mut(&id) else {
            return Ok(Reservation::Busy);
        };
        if profile.is_completed(task_id) || profile.is_pending(task_id) {
            return Ok(Reservation::Busy);
        }
        if let Some(field) = conflict {
            return Ok(Reservation::Conflict(field));
        }
        profile.tasks.insert(task_id, TaskRecord::reserved());
        if let Some(subname) = subname {
            profile.subname = Some(subname.to_string());
        }
        Ok(Reservation::Reserved)
    }

    async fn release_task(
        &self,
        event_id: i64,
        address: &Address,
        task_id: TaskId,
        subname: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(id) = inner.profile_id(event_id, address) else {
            return Ok(());
        };
        let Some(profile) = inner.profiles.get_mut(&id) else {
            return Ok(());
        };
        if !profile.is_pending(task_id) {
            return Ok(());
        }
        profile.tasks.remove(&task_id);
        let held = profile
            .subname
            .as_deref()
            .zip(subname)
            .is_some_and(|(held, released)| held.eq_ignore_ascii_case(released));
        if held {
            profile.subname = None;
        }
        Ok(())
    }

    async fn username_owner(&self, event_id: i64, username: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .profiles
            .values()
            .find(|p| {
                p.event_id == event_id
                    && p.username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(username))
            })
            .map(|p| p.address.clone()))
    }

    async fn subname_taken(&self, subname: &str) -> Result<bool> {
        Ok(self.lock().profiles.values().any(|p| {
            p.subname
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(subname))
        }))
    }

    async fn leaderboard(&self, event_id: i64, limit: i64) -> Result<Vec<Profile>> {
        let mut rows = self.list_profiles(event_id).await?;
        rows.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_profiles(&self, event_id: i64) -> Result<Vec<Profile>> {
        Ok(self
            .lock()
            .profiles
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn set_score(&self, profile_id: i64, score: i64) -> Result<()> {
        if let Some(p) = self.lock().profiles.get_mut(&profile_id) {
            p.score = score;
            p.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn existing_codes(&self, codes: &[String]) -> Result<Vec<String>> {
        let inner = self.lock();
        Ok(codes
            .iter()
            .filter(|c| inner.tickets.values().any(|t| &t.code == *c))
            .cloned()
            .collect())
    }

    async fn insert_tickets(&self, event_id: i64, codes: &[String]) -> Result<Vec<String>> {
        let mut inner = self.lock();
        if !inner.events.contains_key(&event_id) {
            bail!("event {event_id} does not exist");
        }
        let mut inserted = Vec::with_capacity(codes.len());
        for code in codes {
            if inner.tickets.values().any(|t| &t.code == code) {
                continue;
            }
            inner.next_ticket_id += 1;
            let id = inner.next_ticket_id;
            inner.tickets.insert(
                id,
                Ticket {
                    id,
                    event_id,
                    user_id: None,
                    code: code.clone(),
                    is_used: false,
                    used_at: None,
                    attestation_tx_link: None,
                    created_at: Utc::now(),
                },
            );
            inserted.push(code.clone());
        }
        Ok(inserted)
    }

    async fn find_ticket(&self, event_id: i64, code: &str) -> Result<Option<TicketWithOwner>> {
        let inner = self.lock();
        Ok(inner
            .tickets
            .values()
            .find(|t| t.event_id == event_id && t.code == code)
            .map(|t| TicketWithOwner {
                ticket: t.clone(),
                owner: inner.owner_of(t),
            }))
    }

    async fn associate_ticket(
        &self,
        event_id: i64,
        code: &str,
        address: &Address,
    ) -> Result<Association> {
        let mut inner = self.lock();
        let Some(user_id) = inner.profile_id(event_id, address) else {
            return Ok(Association::UserNotFound);
        };
        if inner
            .tickets
            .values()
            .any(|t| t.event_id == event_id && t.user_id == Some(user_id))
        {
            return Ok(Association::UserHasTicket);
        }
        let Some(ticket) = inner
            .tickets
            .values_mut()
            .find(|t| t.event_id == event_id && t.code == code)
        else {
            return Ok(Association::TicketNotFound);
        };
        if ticket.is_used {
            return Ok(Association::AlreadyUsed);
        }
        if ticket.user_id.is_some() {
            return Ok(Association::OwnedByOther);
        }
        ticket.user_id = Some(user_id);
        ticket.is_used = true;
        ticket.used_at = Some(Utc::now());
        Ok(Association::Claimed(ticket.clone()))
    }

    async fn set_attestation_link(&self, ticket_id: i64, tx_link: &str) -> Result<()> {
        if let Some(t) = self.lock().tickets.get_mut(&ticket_id) {
            t.attestation_tx_link = Some(tx_link.to_string());
        }
        Ok(())
    }

    async fn list_tickets(&self, event_id: i64) -> Result<Vec<Ticket>> {
        Ok(self
            .lock()
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
