//! Invariant gate: the enable flag with hard no-op-when-disabled semantics.
//!
//! Every auto-reschedule cycle enters through `run_check`. With the feature
//! disabled the gate records a suppression and returns without holding any
//! reference into the generator, diff engine, apply coordinator or
//! notification path, so "disabled means zero side effects" is structural,
//! not best-effort. Counters are incremented eagerly per completed stage; a
//! failure later in the pipeline never rolls back what earlier stages
//! recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apply::{ApplyCoordinator, ApplyResult};
use crate::block::PlannedBlock;
use crate::counters::ActivityCounters;
use crate::diff::{self, ScheduleDiff};
use crate::partition::non_conflicting;
use crate::present::summary_text;

/// What triggered a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
    Automatic,
    UserTriggered,
}

/// Which gated operation asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GateReason {
    StartMonitoring,
    TimerTick,
    ManualTrigger,
    RescheduleEngine,
    ApplyOperations,
    NotifyUser,
    HistoryWrite,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::StartMonitoring => "startMonitoring",
            GateReason::TimerTick => "timerTick",
            GateReason::ManualTrigger => "manualTrigger",
            GateReason::RescheduleEngine => "rescheduleEngine",
            GateReason::ApplyOperations => "applyOperations",
            GateReason::NotifyUser => "notifyUser",
            GateReason::HistoryWrite => "historyWrite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Executed,
    Suppressed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub reason: GateReason,
    pub provenance: Provenance,
    pub status: GateStatus,
    pub detail: String,
}

/// The audit log keeps the most recent entries only.
const AUDIT_LOG_CAP: usize = 500;

/// External candidate-plan generator. The engine treats its output as
/// untrusted and never assumes it is conflict-free.
pub trait PlanGenerator {
    fn generate(
        &self,
        current: &[PlannedBlock],
        now: DateTime<Utc>,
    ) -> Result<Vec<PlannedBlock>>;
}

/// External notification path.
pub trait NotificationSink {
    fn schedule(&self, notice: &RescheduleNotice) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleNotice {
    pub title: String,
    pub body: String,
    pub changes: usize,
    pub conflicts: usize,
}

/// A diff awaiting user confirmation. Never overwritten by a newer cycle
/// until discarded, applied, or found stale.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSuggestion {
    /// Cycle that produced this suggestion; mismatch with the gate's current
    /// cycle means the suggestion was superseded and is dropped.
    pub generation: u64,
    pub diff: ScheduleDiff,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckSummary {
    pub generation: u64,
    pub diff: ScheduleDiff,
    pub apply: Option<ApplyResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Feature disabled: nothing ran, nothing changed.
    Suppressed,
    Completed(CheckSummary),
    /// The enabled path errored; counters for stages that completed stand.
    Failed { error: String },
}

/// Gate policy, fixed at construction by the composition root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Apply the conflict-free part of a diff immediately instead of staging
    /// the whole diff for user confirmation.
    pub auto_apply: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self { auto_apply: false }
    }
}

/// Invariant gate wiring the reconciliation pipeline together. Collaborators
/// are injected; there are no global accessors.
pub struct InvariantGate<G: PlanGenerator, N: NotificationSink> {
    generator: G,
    notifier: N,
    coordinator: ApplyCoordinator,
    counters: Arc<ActivityCounters>,
    policy: GatePolicy,
    audit: Mutex<Vec<AuditEntry>>,
    pending: Mutex<Option<PendingSuggestion>>,
    generation: AtomicU64,
}

impl<G: PlanGenerator, N: NotificationSink> InvariantGate<G, N> {
    pub fn new(
        generator: G,
        notifier: N,
        coordinator: ApplyCoordinator,
        counters: Arc<ActivityCounters>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            generator,
            notifier,
            coordinator,
            counters,
            policy,
            audit: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Run one auto-reschedule check. Disabled means a recorded suppression
    /// and nothing else.
    pub fn run_check(
        &self,
        enabled: bool,
        reason: GateReason,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> CheckOutcome {
        if !enabled {
            self.counters.record_suppressed(reason.as_str());
            self.record_audit(
                now,
                reason,
                provenance,
                GateStatus::Suppressed,
                "Auto-reschedule suppressed (disabled)".to_string(),
            );
            return CheckOutcome::Suppressed;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.record_check_executed();

        match self.run_enabled(generation, now) {
            Ok(summary) => {
                self.record_audit(
                    now,
                    reason,
                    provenance,
                    GateStatus::Executed,
                    summary_text(&summary.diff),
                );
                CheckOutcome::Completed(summary)
            }
            Err(err) => {
                let error = format!("{err:#}");
                self.record_audit(now, reason, provenance, GateStatus::Failed, error.clone());
                CheckOutcome::Failed { error }
            }
        }
    }

    fn run_enabled(&self, generation: u64, now: DateTime<Utc>) -> Result<CheckSummary> {
        let current = self.coordinator.snapshot();
        self.counters.record_sessions_analyzed(current.len() as u64);

        let candidate = self.generator.generate(&current, now)?;
        let diff = diff::compute(&current, &candidate);
        if diff.is_empty() {
            return Ok(CheckSummary {
                generation,
                diff,
                apply: None,
            });
        }

        let apply = if self.policy.auto_apply {
            let safe = non_conflicting(&diff);
            let result = if safe.change_count() > 0 {
                let result = self.coordinator.apply(&safe);
                self.counters.record_sessions_moved(result.applied as u64);
                Some(result)
            } else {
                None
            };
            if !diff.conflicts.is_empty() {
                self.stage_suggestion(conflicts_only(&diff), generation, now);
            }
            result
        } else {
            self.stage_suggestion(diff.clone(), generation, now);
            None
        };

        self.counters.record_history_written(1);

        let notice = RescheduleNotice {
            title: "Schedule suggestions ready".to_string(),
            body: summary_text(&diff),
            changes: diff.change_count(),
            conflicts: diff.conflicts.len(),
        };
        self.notifier.schedule(&notice)?;
        self.counters.record_notification_scheduled();

        Ok(CheckSummary {
            generation,
            diff,
            apply,
        })
    }

    /// Apply the conflict-free part of the staged suggestion. Conflicted
    /// entries stay staged for manual review; a suggestion from a superseded
    /// cycle is dropped without applying.
    pub fn apply_pending_non_conflicting(&self, enabled: bool) -> Option<ApplyResult> {
        if !enabled {
            self.counters
                .record_suppressed(GateReason::ApplyOperations.as_str());
            self.record_audit(
                Utc::now(),
                GateReason::ApplyOperations,
                Provenance::UserTriggered,
                GateStatus::Suppressed,
                "Apply suppressed (disabled)".to_string(),
            );
            return None;
        }

        let suggestion = self.take_pending()?;
        if suggestion.generation != self.generation.load(Ordering::Relaxed) {
            // Superseded by a newer cycle.
            return None;
        }

        let safe = non_conflicting(&suggestion.diff);
        if safe.change_count() == 0 {
            // Nothing safe to commit; conflicted entries stay staged for
            // manual review instead of vanishing.
            if !suggestion.diff.conflicts.is_empty() {
                *self.lock_pending() = Some(suggestion);
            }
            return None;
        }

        let result = self.coordinator.apply(&safe);
        self.counters.record_sessions_moved(result.applied as u64);
        self.counters.record_history_written(1);

        if !suggestion.diff.conflicts.is_empty() {
            let residue = conflicts_only(&suggestion.diff);
            *self.lock_pending() = Some(PendingSuggestion {
                generation: suggestion.generation,
                summary: summary_text(&residue),
                diff: residue,
                created_at: suggestion.created_at,
            });
        }

        self.record_audit(
            Utc::now(),
            GateReason::ApplyOperations,
            Provenance::UserTriggered,
            GateStatus::Executed,
            format!("Applied {} / skipped {}", result.applied, result.skipped),
        );
        Some(result)
    }

    /// Apply the whole staged suggestion; lock violations are still skipped
    /// per entry by the coordinator.
    pub fn apply_pending(&self, enabled: bool) -> Option<ApplyResult> {
        if !enabled {
            self.counters
                .record_suppressed(GateReason::ApplyOperations.as_str());
            self.record_audit(
                Utc::now(),
                GateReason::ApplyOperations,
                Provenance::UserTriggered,
                GateStatus::Suppressed,
                "Apply suppressed (disabled)".to_string(),
            );
            return None;
        }

        let suggestion = self.take_pending()?;
        if suggestion.generation != self.generation.load(Ordering::Relaxed) {
            return None;
        }

        let result = self.coordinator.apply(&suggestion.diff);
        self.counters.record_sessions_moved(result.applied as u64);
        self.counters.record_history_written(1);
        self.record_audit(
            Utc::now(),
            GateReason::ApplyOperations,
            Provenance::UserTriggered,
            GateStatus::Executed,
            format!("Applied {} / skipped {}", result.applied, result.skipped),
        );
        Some(result)
    }

    pub fn pending_suggestion(&self) -> Option<PendingSuggestion> {
        self.lock_pending().clone()
    }

    pub fn discard_pending(&self) {
        *self.lock_pending() = None;
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.lock_audit().clone()
    }

    pub fn counters(&self) -> &ActivityCounters {
        &self.counters
    }

    pub fn coordinator(&self) -> &ApplyCoordinator {
        &self.coordinator
    }

    /// Stage a suggestion unless one is already waiting (a staged suggestion
    /// is never silently replaced).
    fn stage_suggestion(&self, diff: ScheduleDiff, generation: u64, now: DateTime<Utc>) -> bool {
        let mut pending = self.lock_pending();
        if pending.is_some() {
            return false;
        }
        *pending = Some(PendingSuggestion {
            generation,
            summary: summary_text(&diff),
            diff,
            created_at: now,
        });
        true
    }

    fn take_pending(&self) -> Option<PendingSuggestion> {
        self.lock_pending().take()
    }

    fn record_audit(
        &self,
        timestamp: DateTime<Utc>,
        reason: GateReason,
        provenance: Provenance,
        status: GateStatus,
        detail: String,
    ) {
        let mut audit = self.lock_audit();
        audit.push(AuditEntry {
            timestamp,
            reason,
            provenance,
            status,
            detail,
        });
        if audit.len() > AUDIT_LOG_CAP {
            let excess = audit.len() - AUDIT_LOG_CAP;
            audit.drain(..excess);
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingSuggestion>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_audit(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn conflicts_only(diff: &ScheduleDiff) -> ScheduleDiff {
    let mut residue = ScheduleDiff::empty(diff.reason.clone(), diff.confidence);
    residue.conflicts = diff.conflicts.clone();
    residue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::PlannedBlock;
    use crate::store::ScheduleStore;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    /// Generator that panics if invoked: proves the disabled path never
    /// reaches it.
    struct PanickingGenerator;
    impl PlanGenerator for PanickingGenerator {
        fn generate(
            &self,
            _current: &[PlannedBlock],
            _now: DateTime<Utc>,
        ) -> Result<Vec<PlannedBlock>> {
            panic!("generator must not run while the gate is disabled");
        }
    }

    struct FixedPlan(Vec<PlannedBlock>);
    impl PlanGenerator for FixedPlan {
        fn generate(
            &self,
            _current: &[PlannedBlock],
            _now: DateTime<Utc>,
        ) -> Result<Vec<PlannedBlock>> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;
    impl PlanGenerator for FailingGenerator {
        fn generate(
            &self,
            _current: &[PlannedBlock],
            _now: DateTime<Utc>,
        ) -> Result<Vec<PlannedBlock>> {
            anyhow::bail!("upstream model unavailable")
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);
    impl NotificationSink for &CountingSink {
        fn schedule(&self, _notice: &RescheduleNotice) -> Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct NullSink;
    impl NotificationSink for NullSink {
        fn schedule(&self, _notice: &RescheduleNotice) -> Result<()> {
            Ok(())
        }
    }

    fn gate_with<G: PlanGenerator, N: NotificationSink>(
        generator: G,
        notifier: N,
        blocks: Vec<PlannedBlock>,
        policy: GatePolicy,
    ) -> InvariantGate<G, N> {
        InvariantGate::new(
            generator,
            notifier,
            ApplyCoordinator::new(ScheduleStore::from_blocks(blocks)),
            Arc::new(ActivityCounters::new()),
            policy,
        )
    }

    #[test]
    fn disabled_gate_suppresses_without_side_effects() {
        let gate = gate_with(PanickingGenerator, NullSink, vec![], GatePolicy::default());

        for _ in 0..3 {
            let outcome = gate.run_check(
                false,
                GateReason::TimerTick,
                Provenance::Automatic,
                at(8, 0),
            );
            assert_eq!(outcome, CheckOutcome::Suppressed);
        }

        let snap = gate.counters().snapshot();
        assert_eq!(snap.checks_executed, 0);
        assert_eq!(snap.sessions_analyzed, 0);
        assert_eq!(snap.sessions_moved, 0);
        assert_eq!(snap.history_entries_written, 0);
        assert_eq!(snap.notifications_scheduled, 0);
        assert_eq!(snap.suppressed_executions, 3);
        assert_eq!(snap.last_suppression_reason.as_deref(), Some("timerTick"));

        let audit = gate.audit_log();
        assert_eq!(audit.len(), 3);
        assert!(audit.iter().all(|e| e.status == GateStatus::Suppressed));
    }

    #[test]
    fn enabled_gate_runs_pipeline_and_counts_stages() {
        let sink = CountingSink::default();
        let current = vec![PlannedBlock::new("a", "Reading", at(9, 0), 60)];
        let candidate = vec![
            PlannedBlock::new("a", "Reading", at(10, 0), 60),
            PlannedBlock::new("tmp-1", "Review", at(14, 0), 30),
        ];
        let gate = gate_with(
            FixedPlan(candidate),
            &sink,
            current,
            GatePolicy { auto_apply: true },
        );

        let outcome = gate.run_check(
            true,
            GateReason::ManualTrigger,
            Provenance::UserTriggered,
            at(8, 0),
        );
        let summary = match outcome {
            CheckOutcome::Completed(s) => s,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(summary.apply, Some(ApplyResult { applied: 2, skipped: 0 }));

        let snap = gate.counters().snapshot();
        assert_eq!(snap.checks_executed, 1);
        assert_eq!(snap.sessions_analyzed, 1);
        assert_eq!(snap.sessions_moved, 2);
        assert_eq!(snap.history_entries_written, 1);
        assert_eq!(snap.notifications_scheduled, 1);
        assert_eq!(snap.suppressed_executions, 0);
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn identical_plan_completes_without_noise() {
        let blocks = vec![PlannedBlock::new("a", "Reading", at(9, 0), 60)];
        let gate = gate_with(
            FixedPlan(blocks.clone()),
            NullSink,
            blocks,
            GatePolicy { auto_apply: true },
        );

        let outcome = gate.run_check(
            true,
            GateReason::TimerTick,
            Provenance::Automatic,
            at(8, 0),
        );
        let summary = match outcome {
            CheckOutcome::Completed(s) => s,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(summary.diff.is_empty());
        assert!(summary.apply.is_none());

        let snap = gate.counters().snapshot();
        assert_eq!(snap.notifications_scheduled, 0);
        assert_eq!(snap.history_entries_written, 0);
    }

    #[test]
    fn generator_failure_keeps_earlier_stage_counters() {
        let gate = gate_with(
            FailingGenerator,
            NullSink,
            vec![PlannedBlock::new("a", "Reading", at(9, 0), 60)],
            GatePolicy::default(),
        );

        let outcome = gate.run_check(
            true,
            GateReason::RescheduleEngine,
            Provenance::Automatic,
            at(8, 0),
        );
        assert!(matches!(outcome, CheckOutcome::Failed { .. }));

        let snap = gate.counters().snapshot();
        assert_eq!(snap.checks_executed, 1);
        assert_eq!(snap.sessions_analyzed, 1);
        assert_eq!(snap.sessions_moved, 0);
        assert_eq!(snap.notifications_scheduled, 0);

        let audit = gate.audit_log();
        assert_eq!(audit.last().unwrap().status, GateStatus::Failed);
        assert!(audit.last().unwrap().detail.contains("upstream model unavailable"));
    }

    #[test]
    fn staged_suggestion_is_not_overwritten_by_next_cycle() {
        let candidate = vec![PlannedBlock::new("tmp-1", "Review", at(14, 0), 30)];
        let gate = gate_with(
            FixedPlan(candidate),
            NullSink,
            vec![],
            GatePolicy { auto_apply: false },
        );

        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(8, 0));
        let first = gate.pending_suggestion().unwrap();

        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(9, 0));
        let second = gate.pending_suggestion().unwrap();
        assert_eq!(first.generation, second.generation);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn superseded_pending_suggestion_is_dropped_not_applied() {
        let candidate = vec![PlannedBlock::new("tmp-1", "Review", at(14, 0), 30)];
        let gate = gate_with(
            FixedPlan(candidate),
            NullSink,
            vec![],
            GatePolicy { auto_apply: false },
        );

        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(8, 0));
        // A newer cycle supersedes the staged suggestion.
        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(9, 0));

        let result = gate.apply_pending(true);
        assert!(result.is_none());
        assert!(gate.coordinator().snapshot().is_empty());
    }

    #[test]
    fn apply_pending_non_conflicting_leaves_conflict_residue() {
        let current = vec![PlannedBlock::new("a", "Lecture", at(9, 0), 60).with_locked(true)];
        let candidate = vec![
            PlannedBlock::new("a", "Lecture", at(9, 0), 60).with_locked(true),
            PlannedBlock::new("b", "Study", at(9, 30), 60),
            PlannedBlock::new("c", "Review", at(14, 0), 30),
        ];
        let gate = gate_with(
            FixedPlan(candidate),
            NullSink,
            current,
            GatePolicy { auto_apply: false },
        );

        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(8, 0));
        let result = gate.apply_pending_non_conflicting(true).unwrap();
        assert_eq!(result.applied, 1);

        let residue = gate.pending_suggestion().unwrap();
        assert_eq!(residue.diff.change_count(), 0);
        assert_eq!(residue.diff.conflicts.len(), 1);

        // Only the safe addition landed.
        let blocks = gate.coordinator().snapshot();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().any(|b| b.title == "Review"));
        assert!(!blocks.iter().any(|b| b.title == "Study"));
    }

    #[test]
    fn disabled_apply_is_suppressed_too() {
        let gate = gate_with(PanickingGenerator, NullSink, vec![], GatePolicy::default());
        assert!(gate.apply_pending(false).is_none());
        assert!(gate.apply_pending_non_conflicting(false).is_none());

        let snap = gate.counters().snapshot();
        assert_eq!(snap.suppressed_executions, 2);
        assert_eq!(
            snap.last_suppression_reason.as_deref(),
            Some("applyOperations")
        );

        // Both apply paths leave the same audit trail when suppressed.
        let audit = gate.audit_log();
        assert_eq!(audit.len(), 2);
        for entry in &audit {
            assert_eq!(entry.status, GateStatus::Suppressed);
            assert_eq!(entry.reason, GateReason::ApplyOperations);
        }
    }

    #[test]
    fn fully_conflicted_suggestion_stays_staged() {
        let current = vec![PlannedBlock::new("a", "Lecture", at(9, 0), 60).with_locked(true)];
        let candidate = vec![
            PlannedBlock::new("a", "Lecture", at(9, 0), 60).with_locked(true),
            PlannedBlock::new("b", "Study", at(9, 30), 60),
        ];
        let gate = gate_with(
            FixedPlan(candidate),
            NullSink,
            current,
            GatePolicy { auto_apply: false },
        );

        gate.run_check(true, GateReason::TimerTick, Provenance::Automatic, at(8, 0));
        assert!(gate.pending_suggestion().is_some());

        // Every change is conflicted: nothing to commit, nothing to lose.
        assert!(gate.apply_pending_non_conflicting(true).is_none());

        let staged = gate.pending_suggestion().unwrap();
        assert_eq!(staged.diff.change_count(), 1);
        assert_eq!(staged.diff.conflicts.len(), 1);
        assert_eq!(gate.coordinator().snapshot().len(), 1);
        assert_eq!(gate.counters().snapshot().sessions_moved, 0);
    }

    #[test]
    fn audit_log_evicts_oldest_entries_past_the_cap() {
        let gate = gate_with(PanickingGenerator, NullSink, vec![], GatePolicy::default());
        let base = at(8, 0);
        for i in 0..505i64 {
            gate.run_check(
                false,
                GateReason::TimerTick,
                Provenance::Automatic,
                base + chrono::Duration::seconds(i),
            );
        }

        let audit = gate.audit_log();
        assert_eq!(audit.len(), 500);
        assert_eq!(audit[0].timestamp, base + chrono::Duration::seconds(5));
        assert_eq!(
            audit.last().unwrap().timestamp,
            base + chrono::Duration::seconds(504)
        );
    }
}
