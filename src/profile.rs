//! Per-event attendee profiles.
//!
//! A profile is keyed by `(event_id, address)` and carries the attendee's task
//! completion map plus a denormalised score. Addresses are normalised to
//! lowercase on the way in; the store still compares case-insensitively so
//! legacy mixed-case rows resolve to the same profile.
//!
//! The task map is serialised as a JSON object keyed by the task id as a string
//! (`{"0": {"isCompleted": true, "points": 5}}`), which is what serde_json does
//! for integer map keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub type TaskId = u32;

/// Completion map keyed by task id.
pub type TaskMap = BTreeMap<TaskId, TaskRecord>;

/// One entry of a profile's task map.
///
/// `pending` marks a task reserved by an in-flight on-chain action (payout or
/// subname registration). A pending record never carries points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub points: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl TaskRecord {
    pub fn completed(points: i64) -> Self {
        TaskRecord {
            is_completed: true,
            points,
            tx_link: None,
            completed_at: Some(Utc::now()),
            pending: false,
        }
    }

    pub fn with_tx_link(mut self, tx_link: impl Into<String>) -> Self {
        self.tx_link = Some(tx_link.into());
        self
    }

    pub fn reserved() -> Self {
        TaskRecord {
            pending: true,
            ..Default::default()
        }
    }
}

/// Attendee role chosen during profile setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileRole {
    #[default]
    Explorer,
    Mentor,
}

impl ProfileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileRole::Explorer => "explorer",
            ProfileRole::Mentor => "mentor",
        }
    }
}

impl fmt::Display for ProfileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explorer" => Ok(ProfileRole::Explorer),
            "mentor" => Ok(ProfileRole::Mentor),
            other => Err(ApiError::validation(format!("Invalid role: {other}"))),
        }
    }
}

/// A wallet address, lowercased `0x` + 40 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ApiError::validation("Invalid address"))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ApiError::validation("Invalid address"));
        }
        Ok(Address(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-event attendee profile as exposed over the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub event_id: i64,
    pub address: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub role: ProfileRole,
    pub score: i64,
    pub tasks: TaskMap,
    pub basename: Option<String>,
    pub basename_avatar: Option<String>,
    pub subname: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_completed(&self, task_id: TaskId) -> bool {
        self.tasks
            .get(&task_id)
            .map(|r| r.is_completed)
            .unwrap_or(false)
    }

    pub fn is_pending(&self, task_id: TaskId) -> bool {
        self.tasks.get(&task_id).map(|r| r.pending).unwrap_or(false)
    }
}

/// Public leaderboard row. Contact details and task history stay private.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub address: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub role: ProfileRole,
    pub score: i64,
    pub basename: Option<String>,
    pub subname: Option<String>,
}

impl From<Profile> for LeaderboardEntry {
    fn from(p: Profile) -> Self {
        LeaderboardEntry {
            address: p.address,
            username: p.username,
            avatar: p.avatar,
            role: p.role,
            score: p.score,
            basename: p.basename,
            subname: p.subname,
        }
    }
}

/// Field-level update applied by the profile store.
///
/// `None` leaves a column untouched. `score` and `tasks` are written verbatim;
/// the store never recomputes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<ProfileRole>,
    pub email: Option<String>,
    pub basename: Option<String>,
    pub basename_avatar: Option<String>,
    pub subname: Option<String>,
    pub score: Option<i64>,
    pub tasks: Option<TaskMap>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }

    /// Apply the patch to an in-memory profile.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(ref v) = self.username {
            profile.username = Some(v.clone());
        }
        if let Some(ref v) = self.avatar {
            profile.avatar = Some(v.clone());
        }
        if let Some(v) = self.role {
            profile.role = v;
        }
        if let Some(ref v) = self.email {
            profile.email = Some(v.clone());
        }
        if let Some(ref v) = self.basename {
            profile.basename = Some(v.clone());
        }
        if let Some(ref v) = self.basename_avatar {
            profile.basename_avatar = Some(v.clone());
        }
        if let Some(ref v) = self.subname {
            profile.subname = Some(v.clone());
        }
        if let Some(v) = self.score {
            profile.score = v;
        }
        if let Some(ref v) = self.tasks {
            profile.tasks = v.clone();
        }
    }
}

/// Usernames are 3-32 characters of `[A-Za-z0-9_.-]`.
pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ApiError::validation("Username must be 3-32 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ApiError::validation(
            "Username may only contain letters, digits, '_', '.' and '-'",
        ));
    }
    Ok(())
}
