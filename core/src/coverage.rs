//! Coverage interval merger (stage 3).
//!
//! HEDIS-style union: half-open `[start, end)` supply intervals are
//! sorted and merged whenever `next.start <= current.end`, so early
//! refills and overlapping same-class drugs never double count.
//! The same routine serves both merge scopes; the caller decides
//! whether it passes one drug's fills or a whole measure's.

use crate::{fill::Fill, period::TreatmentPeriod, types::Days};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Half-open day interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl Interval {
    pub fn len(&self) -> Days {
        (self.end - self.start).num_days().max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Days of this interval inside the inclusive window `[from, to]`.
    pub fn overlap_days(&self, from: NaiveDate, to: NaiveDate) -> Days {
        let window_end = to.succ_opt().unwrap_or(NaiveDate::MAX);
        let s = self.start.max(from);
        let e = self.end.min(window_end);
        (e - s).num_days().max(0)
    }
}

/// Union of possibly-overlapping intervals into a sorted disjoint set.
pub fn merge<I>(intervals: I) -> Vec<Interval>
where
    I: IntoIterator<Item = Interval>,
{
    let mut sorted: Vec<Interval> = intervals.into_iter().filter(|i| !i.is_empty()).collect();
    sorted.sort();

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for next in sorted {
        match merged.last_mut() {
            Some(current) if next.start <= current.end => {
                current.end = current.end.max(next.end);
            }
            _ => merged.push(next),
        }
    }
    merged
}

pub fn merge_fills(fills: &[&Fill]) -> Vec<Interval> {
    merge(fills.iter().map(|f| Interval { start: f.start, end: f.end }))
}

/// Covered days of a merged set inside the inclusive window `[from, to]`.
pub fn covered_within(merged: &[Interval], from: NaiveDate, to: NaiveDate) -> Days {
    if to < from {
        return 0;
    }
    merged.iter().map(|i| i.overlap_days(from, to)).sum()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoverageResult {
    pub covered_days:   Days,
    pub treatment_days: Days,
    pub pdc:            f64,
    pub gap_days_used:  Days,
}

/// Coverage facts for one scope at one as-of date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageSnapshot {
    /// Elapsed part of the period: `[start, min(as_of, end)]`.
    pub to_date:             CoverageResult,
    /// Union clipped to the whole period, supply on hand included.
    pub covered_through_end: Days,
    /// Covered period days strictly after the as-of date.
    pub supply_on_hand:      Days,
    /// Period days strictly after the as-of date.
    pub days_remaining:      Days,
    /// End of the last supply minus as-of; `<= 0` means out of medication.
    pub days_to_runout:      Days,
    pub merged:              Vec<Interval>,
}

pub fn assess(fills: &[&Fill], period: &TreatmentPeriod, as_of: NaiveDate) -> CoverageSnapshot {
    let merged = merge_fills(fills);
    let cutoff = period.measurement_cutoff(as_of);

    let treatment_days = (cutoff - period.start).num_days() + 1;
    let covered_days = covered_within(&merged, period.start, cutoff);
    let covered_through_end = covered_within(&merged, period.start, period.end);

    let pdc = if treatment_days > 0 {
        (covered_days as f64 / treatment_days as f64).min(1.0)
    } else {
        0.0
    };

    let days_to_runout = merged
        .last()
        .map(|last| (last.end - as_of).num_days())
        .unwrap_or(0);

    CoverageSnapshot {
        to_date: CoverageResult {
            covered_days,
            treatment_days,
            pdc,
            gap_days_used: treatment_days - covered_days,
        },
        covered_through_end,
        supply_on_hand: covered_through_end - covered_days,
        days_remaining: (period.end - cutoff).num_days().max(0),
        days_to_runout,
        merged,
    }
}
