//! Projection engine (stage 5).

use crate::{coverage::CoverageSnapshot, period::TreatmentPeriod};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Projection {
    /// No further fills: today's coverage plus supply already on hand.
    pub pdc_status_quo: f64,
    /// Every remaining day covered from tomorrow on.
    pub pdc_perfect:    f64,
}

pub fn project(period: &TreatmentPeriod, snapshot: &CoverageSnapshot) -> Projection {
    let total = period.total_days.max(1) as f64;
    let covered = snapshot.to_date.covered_days;

    Projection {
        pdc_status_quo: (snapshot.covered_through_end as f64 / total).min(1.0),
        pdc_perfect:    ((covered + snapshot.days_remaining) as f64 / total).min(1.0),
    }
}
