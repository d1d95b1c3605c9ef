//! # Event Catalog — Quest Definitions per Event
//!
//! Each event stores its quests in `data_en.tasks`. The catalog parses that
//! list into [`TaskDefinition`]s keyed by an explicit, stable task id so that
//! reordering the list in the event data never remaps existing completion
//! records.
//!
//! ## Legacy data
//!
//! Older event exports have no `id` field on tasks; the list position is used
//! instead and a warning is logged. Older exports also link a payout or subname
//! task to its proof task implicitly, by giving both the same `condition`. When
//! `requiresTaskId` is absent, [`EventCatalog::linked_task`] falls back to that
//! convention.
//!
//! ## Validation
//!
//! Building a catalog fails on duplicate task ids, negative points, and locks
//! or requirements that point at a missing task (or at the task itself). The
//! `import-event` subcommand runs the same validation before writing.

use std::collections::HashSet;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::profile::TaskId;

/// Event row as stored in the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub config: Value,
    pub data_en: Value,
    pub data_tr: Option<Value>,
    pub socials: Value,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Languages enabled for this event (`config.languages`), defaulting to `["en"]`.
    pub fn languages(&self) -> Vec<String> {
        self.config
            .get("languages")
            .and_then(|v| v.as_array())
            .map(|langs| {
                langs
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .filter(|langs| !langs.is_empty())
            .unwrap_or_else(|| vec!["en".to_string()])
    }
}

/// An event as exported by the content sync job, ready to be stored.
///
/// Accepts both `snake_case` and `camelCase` keys. The task list is validated
/// on parse so a broken export never reaches the database.
#[derive(Debug, Clone, Deserialize)]
pub struct EventImport {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default, alias = "dataEn")]
    pub data_en: Value,
    #[serde(default, alias = "dataTr")]
    pub data_tr: Option<Value>,
    #[serde(default)]
    pub socials: Value,
    #[serde(default, alias = "isArchived")]
    pub is_archived: bool,
}

impl EventImport {
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut import: EventImport = serde_json::from_str(raw)?;
        if import.name.trim().is_empty() {
            bail!("event name must not be empty");
        }
        for field in [&mut import.config, &mut import.data_en, &mut import.socials] {
            if field.is_null() {
                *field = Value::Object(Default::default());
            }
        }
        EventCatalog::from_data(import.id.unwrap_or(0), &import.data_en)?;
        Ok(import)
    }
}

/// The action a quest asks the attendee to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskAction {
    ConnectWallet,
    SetupProfile,
    ClaimPoap,
    ClickLink,
    ClaimTokens,
    SwapTokens,
    OwnBasename,
    ClaimSubname,
    /// Any action string this service has no handler for.
    #[serde(other)]
    Unsupported,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::ConnectWallet => "connect-wallet",
            TaskAction::SetupProfile => "setup-profile",
            TaskAction::ClaimPoap => "claim-poap",
            TaskAction::ClickLink => "click-link",
            TaskAction::ClaimTokens => "claim-tokens",
            TaskAction::SwapTokens => "swap-tokens",
            TaskAction::OwnBasename => "own-basename",
            TaskAction::ClaimSubname => "claim-subname",
            TaskAction::Unsupported => "unsupported",
        }
    }

    /// Actions whose completion depends on a linked proof task.
    pub fn needs_linked_task(&self) -> bool {
        matches!(self, TaskAction::ClaimTokens | TaskAction::ClaimSubname)
    }
}

/// A single quest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: TaskId,
    pub name: String,
    pub points: i64,
    pub description: String,
    pub action: TaskAction,
    /// Action parameter: POAP id, link URL, ENS parent, swap pair...
    pub condition: Option<String>,
    /// Task that must be completed before this one.
    pub lock: Option<TaskId>,
    /// Proof task a payout or subname claim depends on.
    pub requires_task_id: Option<TaskId>,
}

/// Task as it appears in event JSON; ids and conditions are loosely typed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    points: i64,
    #[serde(default)]
    description: String,
    action: TaskAction,
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    lock: Option<Value>,
    #[serde(default)]
    requires_task_id: Option<Value>,
}

/// Accept `3`, `"3"`; treat `null`, `""` and `-1` as absent.
fn parse_task_ref(value: &Option<Value>, field: &str) -> Result<Option<TaskId>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(-1) => Ok(None),
            Some(v) if v >= 0 && v <= TaskId::MAX as i64 => Ok(Some(v as TaskId)),
            _ => bail!("{field} must be a non-negative integer, got {n}"),
        },
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<TaskId>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{field} must be a non-negative integer, got {s:?}")),
        Some(other) => bail!("{field} must be a non-negative integer, got {other}"),
    }
}

fn condition_string(value: &Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => Some(other.to_string()),
    }
}

/// Parsed, validated quest list for one event.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    pub event_id: i64,
    tasks: Vec<TaskDefinition>,
}

impl EventCatalog {
    pub fn from_event(event: &Event) -> Result<Self> {
        Self::from_data(event.id, &event.data_en)
    }

    /// Build a catalog from an event's `data_en` object.
    pub fn from_data(event_id: i64, data: &Value) -> Result<Self> {
        let raw: Vec<RawTask> = match data.get("tasks") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| anyhow::anyhow!("event {event_id}: invalid task list: {e}"))?,
        };

        let mut tasks = Vec::with_capacity(raw.len());
        let mut positional = 0usize;
        for (index, t) in raw.into_iter().enumerate() {
            let id = match parse_task_ref(&t.id, "id")? {
                Some(id) => id,
                None => {
                    positional += 1;
                    index as TaskId
                }
            };
            if t.points < 0 {
                bail!("event {event_id}: task {id} has negative points");
            }
            tasks.push(TaskDefinition {
                id,
                name: t.name,
                points: t.points,
                description: t.description,
                action: t.action,
                condition: condition_string(&t.condition),
                lock: parse_task_ref(&t.lock, "lock")?,
                requires_task_id: parse_task_ref(&t.requires_task_id, "requiresTaskId")?,
            });
        }
        if positional > 0 {
            warn!(
                event_id,
                count = positional,
                "tasks without explicit id, falling back to list position"
            );
        }

        let catalog = EventCatalog { event_id, tasks };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for t in &self.tasks {
            if !seen.insert(t.id) {
                bail!("event {}: duplicate task id {}", self.event_id, t.id);
            }
        }
        for t in &self.tasks {
            for (field, target) in [("lock", t.lock), ("requiresTaskId", t.requires_task_id)] {
                if let Some(target) = target {
                    if target == t.id {
                        bail!("event {}: task {} {field} points at itself", self.event_id, t.id);
                    }
                    if !seen.contains(&target) {
                        bail!(
                            "event {}: task {} {field} references missing task {target}",
                            self.event_id,
                            t.id
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// The task pre-completed when a profile is first created.
    pub fn connect_wallet_task(&self) -> Option<&TaskDefinition> {
        self.tasks
            .iter()
            .find(|t| t.action == TaskAction::ConnectWallet)
    }

    /// Resolve the proof task a payout/subname task depends on.
    ///
    /// Uses `requiresTaskId` when present, otherwise the first other task that
    /// shares this task's `condition` and is not itself a payout/subname task.
    pub fn linked_task(&self, task: &TaskDefinition) -> Option<&TaskDefinition> {
        if let Some(required) = task.requires_task_id {
            return self.get(required);
        }
        let condition = task.condition.as_deref()?;
        self.tasks.iter().find(|other| {
            other.id != task.id
                && !other.action.needs_linked_task()
                && other.condition.as_deref() == Some(condition)
        })
    }
}
