//! Schedule diff types and the reconciliation engine.
//!
//! `compute` compares the live block set against a candidate plan and
//! classifies the differences. A block whose start *and* duration both
//! changed yields two independent entries (a move and a resize) so partial
//! acceptance can take one without the other. Unchanged blocks produce no
//! entries at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::block::PlannedBlock;
use crate::conflict::{self, ProposedChange, ScheduleConflict};

/// A block not yet persisted, identified by the generator's temp id until
/// apply mints a persistent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedBlock {
    pub temp_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i32,
    pub locked: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovedBlock {
    pub block_id: String,
    pub new_start: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizedBlock {
    pub block_id: String,
    pub new_duration_minutes: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedBlock {
    pub block_id: String,
    pub reason: String,
}

/// Proposed schedule changes. Never mutates anything; the apply coordinator
/// is the only component that commits a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDiff {
    pub added: Vec<AddedBlock>,
    pub moved: Vec<MovedBlock>,
    pub resized: Vec<ResizedBlock>,
    pub removed: Vec<RemovedBlock>,
    pub conflicts: Vec<ScheduleConflict>,
    pub reason: String,
    /// 0.0..=1.0. Non-increasing as conflicts accumulate.
    pub confidence: f64,
}

impl ScheduleDiff {
    pub fn empty(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            added: Vec::new(),
            moved: Vec::new(),
            resized: Vec::new(),
            removed: Vec::new(),
            conflicts: Vec::new(),
            reason: reason.into(),
            confidence,
        }
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.moved.len() + self.resized.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0 && self.conflicts.is_empty()
    }

    /// True when applying the diff twice cannot double-apply anything:
    /// added temp ids never collide with existing-block entries, and removed
    /// ids never collide with move/resize targets. A move and a resize of the
    /// same block are two independent facts and allowed.
    pub fn is_idempotent(&self) -> bool {
        let added: HashSet<&str> = self.added.iter().map(|a| a.temp_id.as_str()).collect();
        let moved: HashSet<&str> = self.moved.iter().map(|m| m.block_id.as_str()).collect();
        let resized: HashSet<&str> = self.resized.iter().map(|r| r.block_id.as_str()).collect();
        let removed: HashSet<&str> = self.removed.iter().map(|r| r.block_id.as_str()).collect();

        added.is_disjoint(&moved)
            && added.is_disjoint(&resized)
            && added.is_disjoint(&removed)
            && removed.is_disjoint(&moved)
            && removed.is_disjoint(&resized)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence out of range: {}", self.confidence));
        }
        if self.added.iter().any(|a| a.temp_id.trim().is_empty()) {
            return Err("added entries must carry a temp id".to_string());
        }
        let existing_ids = self
            .moved
            .iter()
            .map(|m| m.block_id.as_str())
            .chain(self.resized.iter().map(|r| r.block_id.as_str()))
            .chain(self.removed.iter().map(|r| r.block_id.as_str()));
        for id in existing_ids {
            if id.trim().is_empty() {
                return Err("diff entries must reference non-empty block ids".to_string());
            }
        }
        Ok(())
    }
}

/// Per-conflict confidence penalty, applied to the base confidence so the
/// score is non-increasing in conflict count.
const CONFLICT_CONFIDENCE_PENALTY: f64 = 0.1;

/// Compare `current` against `candidate` and classify the differences.
///
/// Matching is by stable identifier. Candidate entries with no current match
/// become `added` (their id is carried as the temp id); current entries
/// absent from the candidate become `removed`; a changed start becomes
/// `moved` and a changed duration `resized`.
pub fn compute(current: &[PlannedBlock], candidate: &[PlannedBlock]) -> ScheduleDiff {
    let current_by_id: HashMap<&str, &PlannedBlock> =
        current.iter().map(|b| (b.id.as_str(), b)).collect();
    let candidate_ids: HashSet<&str> = candidate.iter().map(|b| b.id.as_str()).collect();

    let mut added = Vec::new();
    let mut moved = Vec::new();
    let mut resized = Vec::new();

    for block in candidate {
        match current_by_id.get(block.id.as_str()) {
            Some(existing) => {
                if existing.start != block.start {
                    moved.push(MovedBlock {
                        block_id: block.id.clone(),
                        new_start: block.start,
                        reason: "Start time changed".to_string(),
                    });
                }
                if existing.duration_minutes != block.duration_minutes {
                    resized.push(ResizedBlock {
                        block_id: block.id.clone(),
                        new_duration_minutes: block.duration_minutes,
                        reason: "Duration changed".to_string(),
                    });
                }
            }
            None => added.push(AddedBlock {
                temp_id: block.id.clone(),
                title: block.title.clone(),
                start: block.start,
                duration_minutes: block.duration_minutes,
                locked: block.locked,
                reason: "Proposed by planner".to_string(),
            }),
        }
    }

    let removed: Vec<RemovedBlock> = current
        .iter()
        .filter(|b| !candidate_ids.contains(b.id.as_str()))
        .map(|b| RemovedBlock {
            block_id: b.id.clone(),
            reason: "No longer in candidate plan".to_string(),
        })
        .collect();

    let conflicts = detect_conflicts(current, candidate, &added, &moved, &resized, &removed);

    let confidence =
        (1.0 - CONFLICT_CONFIDENCE_PENALTY * conflicts.len() as f64).clamp(0.0, 1.0);

    ScheduleDiff {
        added,
        moved,
        resized,
        removed,
        conflicts,
        reason: "Reconciled candidate plan against current schedule".to_string(),
        confidence,
    }
}

/// Run the conflict detector over the added+moved entries against the
/// projected schedule (current blocks with candidate placements applied,
/// plus the additions).
fn detect_conflicts(
    current: &[PlannedBlock],
    candidate: &[PlannedBlock],
    added: &[AddedBlock],
    moved: &[MovedBlock],
    resized: &[ResizedBlock],
    removed: &[RemovedBlock],
) -> Vec<ScheduleConflict> {
    let candidate_by_id: HashMap<&str, &PlannedBlock> =
        candidate.iter().map(|b| (b.id.as_str(), b)).collect();
    let resized_ids: HashSet<&str> = resized.iter().map(|r| r.block_id.as_str()).collect();

    let mut projected: Vec<PlannedBlock> = current
        .iter()
        .map(|b| {
            // Removal may still be skipped at apply time, so removed blocks
            // stay in the projection.
            match candidate_by_id.get(b.id.as_str()) {
                Some(c) => {
                    let mut updated = b.clone();
                    updated.start = c.start;
                    if resized_ids.contains(b.id.as_str()) {
                        updated.duration_minutes = c.duration_minutes;
                    }
                    updated
                }
                None => b.clone(),
            }
        })
        .collect();
    for add in added {
        projected.push(
            PlannedBlock::new(
                add.temp_id.clone(),
                add.title.clone(),
                add.start,
                add.duration_minutes,
            )
            .with_locked(add.locked),
        );
    }

    let current_by_id: HashMap<&str, &PlannedBlock> =
        current.iter().map(|b| (b.id.as_str(), b)).collect();

    let mut proposed: Vec<ProposedChange> = Vec::new();
    for add in added {
        proposed.push(ProposedChange::Occupy {
            block_id: add.temp_id.clone(),
            start: add.start,
            duration_minutes: add.duration_minutes,
            locked: add.locked,
        });
    }
    for mv in moved {
        let locked = current_by_id
            .get(mv.block_id.as_str())
            .map(|b| b.locked)
            .unwrap_or(false);
        let duration = candidate_by_id
            .get(mv.block_id.as_str())
            .map(|c| c.duration_minutes)
            .or_else(|| {
                current_by_id
                    .get(mv.block_id.as_str())
                    .map(|b| b.duration_minutes)
            })
            .unwrap_or(0);
        proposed.push(ProposedChange::Occupy {
            block_id: mv.block_id.clone(),
            start: mv.new_start,
            duration_minutes: duration,
            locked,
        });
    }
    for rm in removed {
        proposed.push(ProposedChange::Remove {
            block_id: rm.block_id.clone(),
        });
    }

    conflict::detect(&proposed, &projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockStatus;
    use chrono::TimeZone;

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
    }

    #[test]
    fn identical_schedules_yield_empty_diff() {
        let blocks = vec![
            PlannedBlock::new("a", "Reading", at(2, 9, 0), 60),
            PlannedBlock::new("b", "Problem set", at(2, 11, 0), 90),
        ];
        let diff = compute(&blocks, &blocks);
        assert_eq!(diff.change_count(), 0);
        assert!(diff.conflicts.is_empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn new_candidate_block_is_added_with_temp_id() {
        let current = vec![PlannedBlock::new("a", "Reading", at(2, 9, 0), 60)];
        let candidate = vec![
            PlannedBlock::new("a", "Reading", at(2, 9, 0), 60),
            PlannedBlock::new("tmp-1", "Review", at(2, 14, 0), 45),
        ];
        let diff = compute(&current, &candidate);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].temp_id, "tmp-1");
        assert_eq!(diff.change_count(), 1);
    }

    #[test]
    fn changed_start_and_duration_emit_two_independent_entries() {
        let current = vec![PlannedBlock::new("a", "Reading", at(2, 9, 0), 60)];
        let candidate = vec![PlannedBlock::new("a", "Reading", at(2, 10, 0), 90)];

        let diff = compute(&current, &candidate);
        assert_eq!(diff.moved.len(), 1);
        assert_eq!(diff.resized.len(), 1);
        assert_eq!(diff.moved[0].block_id, "a");
        assert_eq!(diff.resized[0].block_id, "a");
        assert_eq!(diff.change_count(), 2);
        assert!(diff.is_idempotent());
    }

    #[test]
    fn missing_candidate_block_is_removed() {
        let current = vec![
            PlannedBlock::new("a", "Reading", at(2, 9, 0), 60),
            PlannedBlock::new("b", "Review", at(2, 11, 0), 30),
        ];
        let candidate = vec![PlannedBlock::new("a", "Reading", at(2, 9, 0), 60)];

        let diff = compute(&current, &candidate);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].block_id, "b");
    }

    #[test]
    fn change_count_is_additive_across_collections() {
        let current = vec![
            PlannedBlock::new("a", "Reading", at(2, 9, 0), 60),
            PlannedBlock::new("b", "Review", at(2, 11, 0), 30),
        ];
        let candidate = vec![
            PlannedBlock::new("a", "Reading", at(2, 10, 0), 90),
            PlannedBlock::new("tmp-1", "Practice", at(2, 13, 0), 30),
        ];

        let diff = compute(&current, &candidate);
        assert_eq!(
            diff.change_count(),
            diff.added.len() + diff.moved.len() + diff.resized.len() + diff.removed.len()
        );
        assert_eq!(diff.change_count(), 4);
    }

    #[test]
    fn add_overlapping_locked_block_produces_conflict() {
        // Block A [09:00, 10:00) locked; candidate adds B [09:30, 10:30).
        let current = vec![PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60).with_locked(true)];
        let candidate = vec![
            PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60).with_locked(true),
            PlannedBlock::new("b", "Study", at(2, 9, 30), 60),
        ];

        let diff = compute(&current, &candidate);
        assert_eq!(diff.conflicts.len(), 1);
        let conflict = &diff.conflicts[0];
        assert_eq!(conflict.block_id, "b");
        assert_eq!(conflict.conflicting_block_id.as_deref(), Some("a"));
    }

    #[test]
    fn confidence_is_non_increasing_with_conflicts() {
        let clean_current = vec![PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60)];
        let clean_candidate = vec![
            PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60),
            PlannedBlock::new("b", "Study", at(2, 14, 0), 60),
        ];
        let clean = compute(&clean_current, &clean_candidate);

        let locked_current =
            vec![PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60).with_locked(true)];
        let conflicted_candidate = vec![
            PlannedBlock::new("a", "Lecture", at(2, 9, 0), 60).with_locked(true),
            PlannedBlock::new("b", "Study", at(2, 9, 30), 60),
        ];
        let conflicted = compute(&locked_current, &conflicted_candidate);

        assert!(conflicted.confidence < clean.confidence);
    }

    #[test]
    fn removal_of_in_progress_block_is_flagged() {
        let current = vec![
            PlannedBlock::new("a", "Deep work", at(2, 9, 0), 60)
                .with_status(BlockStatus::InProgress),
        ];
        let diff = compute(&current, &[]);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.conflicts.len(), 1);
        assert!(diff.conflicts[0].conflicting_block_id.is_none());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut diff = ScheduleDiff::empty("test", 0.5);
        assert!(diff.validate().is_ok());
        diff.confidence = 1.5;
        assert!(diff.validate().is_err());
    }
}
