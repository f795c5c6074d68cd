//! Recurrence rules and single-step due-date expansion.
//!
//! `next_due_date` advances an anchor date by one rule interval and then
//! forward-adjusts off weekends/holidays. End conditions (`End`) are enforced
//! by the caller via `should_generate_next`; the expander itself is a
//! single-step function, not an iterator owner.
//!
//! The serialized shape is load-bearing: previously stored recurring tasks
//! use camelCase field names and a `{type, value?}` tagged `end` variant.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// End condition for a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum End {
    Never,
    AfterOccurrences(u32),
    Until(NaiveDate),
}

/// Where holiday dates come from when `skip_holidays` is set.
///
/// The engine only consults a caller-supplied [`HolidayCalendar`]; these
/// variants exist for persisted-rule compatibility and for the caller to pick
/// a provider. With no provider configured the skip degrades to weekend-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HolidaySource {
    None,
    DeviceCalendar,
    UsaFederal,
    Custom,
}

/// Only forward adjustment is supported: a skipped date always advances,
/// never moves backward past its computed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipPolicy {
    pub skip_weekends: bool,
    pub skip_holidays: bool,
    pub holiday_source: HolidaySource,
    pub adjustment: Adjustment,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            skip_weekends: false,
            skip_holidays: false,
            holiday_source: HolidaySource::None,
            adjustment: Adjustment::Forward,
        }
    }
}

/// Immutable recurrence rule, constructed once per recurring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Always >= 1. Clamped at construction and at deserialization; a
    /// malformed interval is corrected, never rejected.
    #[serde(deserialize_with = "clamp_interval")]
    pub interval: u32,
    pub end: End,
    pub skip_policy: SkipPolicy,
}

fn clamp_interval<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(1, u32::MAX as i64) as u32)
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: i32, end: End, skip_policy: SkipPolicy) -> Self {
        Self {
            frequency,
            interval: interval.max(1) as u32,
            end,
            skip_policy,
        }
    }

    /// Interval-1, never-ending rule with no skip policy.
    pub fn preset(frequency: Frequency) -> Self {
        Self::new(frequency, 1, End::Never, SkipPolicy::default())
    }
}

/// Source of holiday dates consulted during forward adjustment.
pub trait HolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Set-backed holiday calendar for custom sources and tests.
#[derive(Debug, Clone, Default)]
pub struct HolidaySet {
    dates: BTreeSet<NaiveDate>,
}

impl HolidaySet {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }
}

impl HolidayCalendar for HolidaySet {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

/// Cap on the forward walk so a degenerate holiday calendar (every day a
/// holiday) cannot loop unbounded. A year plus slack is always enough for
/// real data.
const MAX_FORWARD_ADJUST_DAYS: u32 = 370;

/// Advance `from` by one rule interval, then forward-adjust off weekends and
/// holidays per the rule's skip policy.
///
/// Errors only on calendar arithmetic overflow; end conditions are the
/// caller's concern.
pub fn next_due_date(
    rule: &RecurrenceRule,
    from: NaiveDate,
    holidays: Option<&dyn HolidayCalendar>,
) -> Result<NaiveDate> {
    let stepped = match rule.frequency {
        Frequency::Daily => from.checked_add_days(Days::new(rule.interval as u64)),
        Frequency::Weekly => from.checked_add_days(Days::new(7 * rule.interval as u64)),
        Frequency::Monthly => from.checked_add_months(Months::new(rule.interval)),
        Frequency::Yearly => from.checked_add_months(Months::new(12 * rule.interval)),
    }
    .with_context(|| format!("recurrence step overflowed from {from}"))?;

    adjust_forward(rule, stepped, holidays)
}

fn adjust_forward(
    rule: &RecurrenceRule,
    date: NaiveDate,
    holidays: Option<&dyn HolidayCalendar>,
) -> Result<NaiveDate> {
    let policy = &rule.skip_policy;
    if !policy.skip_weekends && !policy.skip_holidays {
        return Ok(date);
    }

    let mut current = date;
    for _ in 0..MAX_FORWARD_ADJUST_DAYS {
        let on_weekend = policy.skip_weekends && is_weekend(current);
        let on_holiday = policy.skip_holidays
            && policy.holiday_source != HolidaySource::None
            && holidays.is_some_and(|h| h.is_holiday(current));
        if !on_weekend && !on_holiday {
            return Ok(current);
        }
        current = current
            .checked_add_days(Days::new(1))
            .with_context(|| format!("forward adjustment overflowed past {current}"))?;
    }
    Ok(current)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Caller-side end-condition check before generating occurrence `next_index`
/// (0-based series index) from `base_date`.
pub fn should_generate_next(rule: &RecurrenceRule, next_index: u32, base_date: NaiveDate) -> bool {
    match rule.end {
        End::Never => true,
        End::AfterOccurrences(count) => next_index < count,
        End::Until(end_date) => base_date <= end_date,
    }
}
