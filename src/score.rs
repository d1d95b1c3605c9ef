//! Score arithmetic over task maps.
//!
//! A profile's score is the sum of `points` over its *completed* task records.
//! Incomplete and pending placeholders never count, even if a legacy row left a
//! non-zero `points` value on them.

use crate::profile::{Profile, TaskMap};

/// Total score for a task map.
pub fn total(tasks: &TaskMap) -> i64 {
    tasks
        .values()
        .filter(|r| r.is_completed)
        .map(|r| r.points)
        .sum()
}

/// Difference between the stored and the computed score, if any.
///
/// Returns `Some((stored, computed))` when they disagree.
pub fn drift(profile: &Profile) -> Option<(i64, i64)> {
    let computed = total(&profile.tasks);
    if computed == profile.score {
        None
    } else {
        Some((profile.score, computed))
    }
}

/// A stored score that disagrees with its task map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRepair {
    pub profile_id: i64,
    pub address: String,
    pub stored: i64,
    pub computed: i64,
}

/// Profiles whose stored score has drifted, with the value it should have.
pub fn repairs(profiles: &[Profile]) -> Vec<ScoreRepair> {
    profiles
        .iter()
        .filter_map(|p| {
            drift(p).map(|(stored, computed)| ScoreRepair {
                profile_id: p.id,
                address: p.address.clone(),
                stored,
                computed,
            })
        })
        .collect()
}
