//! reconcile-core: schedule reconciliation and invariant-gated auto-reschedule

pub mod apply;
pub mod block;
pub mod conflict;
pub mod counters;
pub mod diff;
pub mod gate;
pub mod partition;
pub mod present;
pub mod recurrence;
pub mod store;

pub use apply::{ApplyCoordinator, ApplyResult};
pub use block::{BlockSource, BlockStatus, PlannedBlock};
pub use conflict::{detect, ProposedChange, ScheduleConflict};
pub use counters::{ActivityCounters, CountersSnapshot};
pub use diff::{
    compute, AddedBlock, MovedBlock, RemovedBlock, ResizedBlock, ScheduleDiff,
};
pub use gate::{
    AuditEntry, CheckOutcome, CheckSummary, GatePolicy, GateReason, GateStatus, InvariantGate,
    NotificationSink, PendingSuggestion, PlanGenerator, Provenance, RescheduleNotice,
};
pub use partition::non_conflicting;
pub use present::{
    conflict_items, conflict_items_in, display_items, display_items_in, summary_text,
    ConflictDisplayItem, DiffDisplayItem,
};
pub use recurrence::{
    next_due_date, should_generate_next, Adjustment, End, Frequency, HolidayCalendar,
    HolidaySet, HolidaySource, RecurrenceRule, SkipPolicy,
};
pub use store::ScheduleStore;
