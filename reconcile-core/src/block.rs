//! Planned block model for the reconciliation engine.
//!
//! A block is a scheduled unit of time on the calendar, optionally linked to a
//! task/course. Candidate plans from the generator use the same type; ids of
//! not-yet-persisted blocks are the generator's temp ids until apply mints a
//! persistent one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Upcoming,
    InProgress,
    Completed,
    Overdue,
}

/// Who created the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSource {
    Generator,
    Manual,
}

/// Core block type.
///
/// Note: we keep this small + serializable. Storage mechanics are a later layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBlock {
    pub id: String,
    pub title: String,

    pub task_id: Option<String>,
    pub course_id: Option<String>,

    pub start: DateTime<Utc>,
    /// Minutes.
    pub duration_minutes: i32,

    /// Locked blocks are never moved, resized or removed by the engine.
    pub locked: bool,
    pub status: BlockStatus,
    pub source: BlockSource,
}

impl PlannedBlock {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            task_id: None,
            course_id: None,
            start,
            duration_minutes,
            locked: false,
            status: BlockStatus::Upcoming,
            source: BlockSource::Generator,
        }
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source: BlockSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    /// Exclusive end of the occupied interval `[start, end)`.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes as i64)
    }

    /// Half-open interval overlap; touching boundaries do not overlap.
    pub fn overlaps(&self, other: &PlannedBlock) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must be non-empty".to_string());
        }
        if self.duration_minutes <= 0 {
            return Err("duration_minutes must be positive".to_string());
        }
        Ok(())
    }
}
