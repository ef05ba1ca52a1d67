//! Treatment period resolver (stage 2).
//!
//! start = earliest in-scope fill of the entity being measured
//! end   = min(Dec 31 of the measurement year, enrollment end, death)
//! total = inclusive day count, computed by date difference so leap
//!         years come out at 366 without special casing.

use crate::{clock::AsOfClock, fill::Fill, types::Days};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentPeriod {
    pub start:      NaiveDate,
    pub end:        NaiveDate,
    pub total_days: Days,
}

impl TreatmentPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Self { start, end, total_days: inclusive_days(start, end) })
    }

    /// The last day whose coverage is already history: min(as_of, end).
    pub fn measurement_cutoff(&self, as_of: NaiveDate) -> NaiveDate {
        as_of.min(self.end)
    }
}

/// Enrollment facts that can shorten the period.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodBounds {
    pub enrollment_end: Option<NaiveDate>,
    pub death_date:     Option<NaiveDate>,
}

pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> Days {
    (end - start).num_days() + 1
}

/// Period end before any fill is considered.
pub fn period_end(clock: &AsOfClock, bounds: &PeriodBounds) -> NaiveDate {
    [Some(clock.year_end()), bounds.enrollment_end, bounds.death_date]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(|| clock.year_end())
}

/// Fills that count toward the measurement year: dated on or after
/// Jan 1 and no later than both the period end and the as-of date.
/// Input order is preserved.
pub fn in_scope<'a>(fills: &'a [Fill], clock: &AsOfClock, bounds: &PeriodBounds) -> Vec<&'a Fill> {
    let first = clock.year_start();
    let last = period_end(clock, bounds).min(clock.as_of);
    fills
        .iter()
        .filter(|f| f.start >= first && f.start <= last)
        .collect()
}

/// Resolve the period for one scope (a medication or a whole measure).
/// Returns None when no fill falls inside the measurement year.
pub fn resolve(fills: &[&Fill], clock: &AsOfClock, bounds: &PeriodBounds) -> Option<TreatmentPeriod> {
    let start = fills.iter().map(|f| f.start).min()?;
    TreatmentPeriod::new(start, period_end(clock, bounds))
}
