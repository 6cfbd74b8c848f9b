//! Periodic scheduling primitives: [`Schedule`] (pure value) and
//! [`SchedulerEntry`] (the mutable bookkeeping a backend keeps per periodic
//! job).

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

/// A cadence, optionally anchored to a fixed instant so that fires line up
/// with wall-clock boundaries (e.g. "every hour, on the hour") rather than
/// drifting from whenever the entry happened to be created.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub cadence: Duration,
    pub anchor: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn every(cadence: Duration) -> Self {
        Self { cadence, anchor: None }
    }

    pub fn anchored_every(cadence: Duration, anchor: DateTime<Utc>) -> Self {
        Self { cadence, anchor: Some(anchor) }
    }

    /// Given the last effective run time, report whether the schedule is
    /// due at `now` and how long remains until the next fire.
    ///
    /// Returns `(true, cadence)` exactly when due — the second element then
    /// doubles as the expected gap until the fire *after* this one, matching
    /// the poll-interval the caller should use while waiting.
    pub fn is_due(&self, last_run_at: DateTime<Utc>, now: DateTime<Utc>) -> (bool, Duration) {
        let next_run = last_run_at + chrono_duration(self.cadence);
        let remaining = next_run - now;
        if remaining <= ChronoDuration::zero() {
            (true, self.cadence)
        } else {
            (false, remaining.to_std().unwrap_or(Duration::ZERO))
        }
    }
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

/// Resolve the last run time a schedule should be considered to have fired
/// at, aligning it to the configured anchor. Pure function of `(schedule,
/// last_run_at)`; unlike the Python original this does not cache anything on
/// the schedule itself, so it is safe to call repeatedly.
pub fn effective_last_run_at(schedule: &Schedule, last_run_at: DateTime<Utc>) -> DateTime<Utc> {
    let anchor = match schedule.anchor {
        Some(a) => a,
        None => return last_run_at,
    };
    if schedule.cadence.is_zero() {
        return anchor;
    }
    let cadence = chrono_duration(schedule.cadence);
    let cadence_ms = cadence.num_milliseconds().max(1);
    let delta_ms = (last_run_at - anchor).num_milliseconds();
    let periods = delta_ms.div_euclid(cadence_ms);
    let mut aligned = anchor + ChronoDuration::milliseconds(periods * cadence_ms);
    while aligned <= last_run_at {
        aligned += cadence;
    }
    while aligned > last_run_at {
        aligned -= cadence;
    }
    aligned
}

/// Per-job bookkeeping kept by a backend for every periodic job it drives.
#[derive(Debug, Clone)]
pub struct SchedulerEntry {
    pub name: String,
    pub schedule: Schedule,
    pub last_run_at: DateTime<Utc>,
    pub total_run_count: u64,
}

impl SchedulerEntry {
    pub fn new(name: impl Into<String>, schedule: Schedule, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            schedule,
            last_run_at: created_at,
            total_run_count: 0,
        }
    }

    /// Record that the job fired at `now`.
    pub fn next(&mut self, now: DateTime<Utc>) {
        self.last_run_at = now;
        self.total_run_count += 1;
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> (bool, Duration) {
        let scheduled = effective_last_run_at(&self.schedule, self.last_run_at);
        self.schedule.is_due(scheduled, now)
    }
}

/// Concurrent table of scheduler entries, keyed by job name. At most one
/// entry exists per job name.
#[derive(Default)]
pub struct SchedulerTable {
    entries: DashMap<String, SchedulerEntry>,
}

impl SchedulerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: SchedulerEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn advance(&self, name: &str, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.next(now);
        }
    }

    pub fn get(&self, name: &str) -> Option<SchedulerEntry> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// A point-in-time copy of every entry, safe to hold across an `.await`
    /// since it owns no lock on the underlying map.
    pub fn snapshot(&self) -> Vec<SchedulerEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
