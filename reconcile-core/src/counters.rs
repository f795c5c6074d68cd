//! Activity counters instrumenting the auto-reschedule gate.
//!
//! The counters exist to make the suppression invariant testable: with the
//! feature disabled, every counter except `suppressed_executions` must stay
//! at zero. Increments are lock-free atomics since diagnostic surfaces read
//! them concurrently; only the last-suppression metadata sits behind a mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ActivityCounters {
    checks_executed: AtomicU64,
    sessions_analyzed: AtomicU64,
    sessions_moved: AtomicU64,
    history_entries_written: AtomicU64,
    notifications_scheduled: AtomicU64,
    suppressed_executions: AtomicU64,
    last: Mutex<LastUpdate>,
}

#[derive(Debug, Default, Clone)]
struct LastUpdate {
    suppression_reason: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

/// Read-only snapshot for the diagnostics/debug surface. Field names match
/// the persisted counter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub checks_executed: u64,
    pub sessions_analyzed: u64,
    pub sessions_moved: u64,
    pub history_entries_written: u64,
    pub notifications_scheduled: u64,
    pub suppressed_executions: u64,
    pub last_suppression_reason: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl ActivityCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check_executed(&self) {
        self.checks_executed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_sessions_analyzed(&self, count: u64) {
        self.sessions_analyzed.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_sessions_moved(&self, count: u64) {
        self.sessions_moved.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_history_written(&self, count: u64) {
        self.history_entries_written
            .fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_notification_scheduled(&self) {
        self.notifications_scheduled.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_suppressed(&self, reason: &str) {
        self.suppressed_executions.fetch_add(1, Ordering::Relaxed);
        let mut last = self.lock_last();
        last.suppression_reason = Some(reason.to_string());
        last.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let last = self.lock_last().clone();
        CountersSnapshot {
            checks_executed: self.checks_executed.load(Ordering::Relaxed),
            sessions_analyzed: self.sessions_analyzed.load(Ordering::Relaxed),
            sessions_moved: self.sessions_moved.load(Ordering::Relaxed),
            history_entries_written: self.history_entries_written.load(Ordering::Relaxed),
            notifications_scheduled: self.notifications_scheduled.load(Ordering::Relaxed),
            suppressed_executions: self.suppressed_executions.load(Ordering::Relaxed),
            last_suppression_reason: last.suppression_reason,
            last_updated_at: last.updated_at,
        }
    }

    /// Flat key-value export for debug surfaces.
    pub fn export(&self) -> Vec<(String, String)> {
        let snap = self.snapshot();
        vec![
            ("checksExecuted".to_string(), snap.checks_executed.to_string()),
            ("sessionsAnalyzed".to_string(), snap.sessions_analyzed.to_string()),
            ("sessionsMoved".to_string(), snap.sessions_moved.to_string()),
            (
                "historyEntriesWritten".to_string(),
                snap.history_entries_written.to_string(),
            ),
            (
                "notificationsScheduled".to_string(),
                snap.notifications_scheduled.to_string(),
            ),
            (
                "suppressedExecutions".to_string(),
                snap.suppressed_executions.to_string(),
            ),
            (
                "lastSuppressionReason".to_string(),
                snap.last_suppression_reason.unwrap_or_default(),
            ),
            (
                "lastUpdatedAt".to_string(),
                snap.last_updated_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ),
        ]
    }

    /// Debug-build-only reset for tests and the developer counter view.
    #[cfg(debug_assertions)]
    pub fn reset(&self) {
        self.checks_executed.store(0, Ordering::Relaxed);
        self.sessions_analyzed.store(0, Ordering::Relaxed);
        self.sessions_moved.store(0, Ordering::Relaxed);
        self.history_entries_written.store(0, Ordering::Relaxed);
        self.notifications_scheduled.store(0, Ordering::Relaxed);
        self.suppressed_executions.store(0, Ordering::Relaxed);
        *self.lock_last() = LastUpdate::default();
    }

    fn touch(&self) {
        self.lock_last().updated_at = Some(Utc::now());
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, LastUpdate> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
