//! Deterministic presentation ordering and formatting for diff previews.
//!
//! No side effects and no platform formatting: identical inputs always yield
//! identical output order, because the preview tests assert on it directly.
//! Entries sort by effective start date (missing dates sort last), then by
//! item id; conflicts sort by best-effort date, then by block id. Lines
//! render in a caller-chosen timezone; the sort keys stay UTC instants, so
//! the order never depends on where the user is.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::block::PlannedBlock;
use crate::diff::ScheduleDiff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDisplayItem {
    pub id: String,
    pub start: Option<DateTime<Utc>>,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDisplayItem {
    pub id: String,
    pub sort_date: Option<DateTime<Utc>>,
    pub sort_tag: String,
    pub line: String,
}

fn day_time(dt: DateTime<Tz>) -> String {
    dt.format("%a %-I:%M %p").to_string()
}

fn time_only(dt: DateTime<Tz>) -> String {
    dt.format("%-I:%M %p").to_string()
}

fn block_line(start: DateTime<Utc>, duration_minutes: i32, title: &str, tz: Tz) -> String {
    let end = start + chrono::Duration::minutes(duration_minutes as i64);
    format!(
        "{}-{} - {}",
        day_time(start.with_timezone(&tz)),
        time_only(end.with_timezone(&tz)),
        title
    )
}

/// Diff entries in display order, rendered in UTC.
pub fn display_items(diff: &ScheduleDiff, current: &[PlannedBlock]) -> Vec<DiffDisplayItem> {
    display_items_in(diff, current, Tz::UTC)
}

/// Diff entries in display order, lines rendered in `tz`. `current` resolves
/// titles and durations for moved blocks; unknown ids fall back to the id
/// itself.
pub fn display_items_in(
    diff: &ScheduleDiff,
    current: &[PlannedBlock],
    tz: Tz,
) -> Vec<DiffDisplayItem> {
    let current_by_id: HashMap<&str, &PlannedBlock> =
        current.iter().map(|b| (b.id.as_str(), b)).collect();
    let resized_by_id: HashMap<&str, i32> = diff
        .resized
        .iter()
        .map(|r| (r.block_id.as_str(), r.new_duration_minutes))
        .collect();

    let mut items = Vec::new();

    for add in &diff.added {
        items.push(DiffDisplayItem {
            id: format!("add-{}", add.temp_id),
            start: Some(add.start),
            line: block_line(add.start, add.duration_minutes, &add.title, tz),
        });
    }

    for mv in &diff.moved {
        let existing = current_by_id.get(mv.block_id.as_str());
        let title = existing
            .map(|b| b.title.as_str())
            .unwrap_or(mv.block_id.as_str());
        let duration = resized_by_id
            .get(mv.block_id.as_str())
            .copied()
            .or_else(|| existing.map(|b| b.duration_minutes))
            .unwrap_or(0);
        items.push(DiffDisplayItem {
            id: format!("move-{}", mv.block_id),
            start: Some(mv.new_start),
            line: block_line(mv.new_start, duration, title, tz),
        });
    }

    for resize in &diff.resized {
        items.push(DiffDisplayItem {
            id: format!("resize-{}", resize.block_id),
            start: None,
            line: format!(
                "Resize {} to {} min",
                resize.block_id, resize.new_duration_minutes
            ),
        });
    }

    for remove in &diff.removed {
        items.push(DiffDisplayItem {
            id: format!("remove-{}", remove.block_id),
            start: None,
            line: format!("Remove {}", remove.block_id),
        });
    }

    items.sort_by(|lhs, rhs| {
        let left = lhs.start.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let right = rhs.start.unwrap_or(DateTime::<Utc>::MAX_UTC);
        left.cmp(&right).then_with(|| lhs.id.cmp(&rhs.id))
    });
    items
}

/// Conflicts in display order, rendered in UTC.
pub fn conflict_items(diff: &ScheduleDiff) -> Vec<ConflictDisplayItem> {
    conflict_items_in(diff, Tz::UTC)
}

/// Conflicts in display order, lines rendered in `tz`. The id → date map is
/// built once per diff; a conflict takes the date of its `block_id` first,
/// else of its `conflicting_block_id`, else sorts last.
pub fn conflict_items_in(diff: &ScheduleDiff, tz: Tz) -> Vec<ConflictDisplayItem> {
    let mut date_by_id: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for add in &diff.added {
        date_by_id.insert(add.temp_id.as_str(), add.start);
    }
    for mv in &diff.moved {
        date_by_id.insert(mv.block_id.as_str(), mv.new_start);
    }

    let mut items: Vec<ConflictDisplayItem> = diff
        .conflicts
        .iter()
        .map(|conflict| {
            let date = date_by_id
                .get(conflict.block_id.as_str())
                .or_else(|| {
                    conflict
                        .conflicting_block_id
                        .as_deref()
                        .and_then(|other| date_by_id.get(other))
                })
                .copied();
            let line = match date {
                Some(d) => format!(
                    "{} \u{2022} {} \u{2022} {}",
                    day_time(d.with_timezone(&tz)),
                    conflict.block_id,
                    conflict.reason
                ),
                None => format!("{} \u{2022} {}", conflict.block_id, conflict.reason),
            };
            ConflictDisplayItem {
                id: conflict.id.clone(),
                sort_date: date,
                sort_tag: conflict.block_id.clone(),
                line,
            }
        })
        .collect();

    items.sort_by(|lhs, rhs| {
        let left = lhs.sort_date.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let right = rhs.sort_date.unwrap_or(DateTime::<Utc>::MAX_UTC);
        left.cmp(&right).then_with(|| lhs.sort_tag.cmp(&rhs.sort_tag))
    });
    items
}

/// One-line summary for the suggestion strip, e.g. "Add 2 - Move 1 - Conflicts 1".
pub fn summary_text(diff: &ScheduleDiff) -> String {
    let mut parts = Vec::new();
    if !diff.added.is_empty() {
        parts.push(format!("Add {}", diff.added.len()));
    }
    if !diff.moved.is_empty() {
        parts.push(format!("Move {}", diff.moved.len()));
    }
    if !diff.resized.is_empty() {
        parts.push(format!("Resize {}", diff.resized.len()));
    }
    if !diff.removed.is_empty() {
        parts.push(format!("Remove {}", diff.removed.len()));
    }
    if !diff.conflicts.is_empty() {
        parts.push(format!("Conflicts {}", diff.conflicts.len()));
    }
    if parts.is_empty() {
        return "No changes".to_string();
    }
    parts.join(" - ")
}
