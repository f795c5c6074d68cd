//! Conflict detection between proposed schedule changes and existing blocks.
//!
//! Pure and deterministic: same inputs, same conflicts, same order. Conflicts
//! are diff output, not errors (the caller decides what to do with them).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::block::{BlockStatus, PlannedBlock};

/// A detected incompatibility between a proposed change and an existing block.
///
/// `conflicting_block_id` is present for pairwise time overlaps; a conflict
/// without one denotes a structural violation (e.g. removing an in-progress
/// block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub id: String,
    pub block_id: String,
    pub conflicting_block_id: Option<String>,
    pub reason: String,
}

/// A change the diff engine wants checked against the projected schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedChange {
    /// An added or moved block occupying `[start, start + duration)`.
    Occupy {
        block_id: String,
        start: DateTime<Utc>,
        duration_minutes: i32,
        locked: bool,
    },
    /// Removal of an existing block.
    Remove { block_id: String },
}

/// Detect conflicts between `proposed` changes and `all_blocks` (the current
/// schedule with the candidate's placements projected onto it).
///
/// Overlap uses half-open intervals: touching boundaries are not conflicts.
/// An overlap only conflicts when at least one participant is locked.
pub fn detect(proposed: &[ProposedChange], all_blocks: &[PlannedBlock]) -> Vec<ScheduleConflict> {
    let mut conflicts = Vec::new();
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

    for change in proposed {
        match change {
            ProposedChange::Occupy {
                block_id,
                start,
                duration_minutes,
                locked,
            } => {
                let end = *start + Duration::minutes(*duration_minutes as i64);
                for other in all_blocks {
                    if other.id == *block_id {
                        continue;
                    }
                    let overlaps = *start < other.end() && other.start < end;
                    if !overlaps || !(*locked || other.locked) {
                        continue;
                    }
                    let pair = ordered_pair(block_id, &other.id);
                    if !seen_pairs.insert(pair) {
                        continue;
                    }
                    conflicts.push(ScheduleConflict {
                        id: format!("conflict-{:03}", conflicts.len()),
                        block_id: block_id.clone(),
                        conflicting_block_id: Some(other.id.clone()),
                        reason: format!("Overlaps locked time with '{}'", other.title),
                    });
                }
            }
            ProposedChange::Remove { block_id } => {
                let target = all_blocks.iter().find(|b| b.id == *block_id);
                if let Some(block) = target {
                    if block.status == BlockStatus::InProgress {
                        conflicts.push(ScheduleConflict {
                            id: format!("conflict-{:03}", conflicts.len()),
                            block_id: block_id.clone(),
                            conflicting_block_id: None,
                            reason: "Cannot remove a block that is in progress".to_string(),
                        });
                    }
                }
            }
        }
    }

    conflicts
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
