//! Conflict-free partition of a schedule diff.
//!
//! Supports "apply everything safe, leave conflicts for manual review": the
//! returned diff touches no identifier implicated in any conflict and carries
//! an empty conflict list.

use std::collections::HashSet;

use crate::diff::ScheduleDiff;

/// Return the sub-diff whose entries touch no conflicted identifier.
///
/// The blocked set is every conflict's `block_id` plus its
/// `conflicting_block_id` when present. The result never has more changes
/// than the input and always has zero conflicts.
pub fn non_conflicting(diff: &ScheduleDiff) -> ScheduleDiff {
    let blocked: HashSet<&str> = diff
        .conflicts
        .iter()
        .flat_map(|c| {
            std::iter::once(c.block_id.as_str())
                .chain(c.conflicting_block_id.as_deref())
        })
        .collect();

    ScheduleDiff {
        added: diff
            .added
            .iter()
            .filter(|a| !blocked.contains(a.temp_id.as_str()))
            .cloned()
            .collect(),
        moved: diff
            .moved
            .iter()
            .filter(|m| !blocked.contains(m.block_id.as_str()))
            .cloned()
            .collect(),
        resized: diff
            .resized
            .iter()
            .filter(|r| !blocked.contains(r.block_id.as_str()))
            .cloned()
            .collect(),
        removed: diff
            .removed
            .iter()
            .filter(|r| !blocked.contains(r.block_id.as_str()))
            .cloned()
            .collect(),
        conflicts: Vec::new(),
        reason: diff.reason.clone(),
        confidence: diff.confidence,
    }
}
