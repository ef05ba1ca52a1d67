//! Gap & delay-budget accountant (stage 4).
//!
//! allowed   = round(totalDays × allowance)
//! used      = elapsed days without supply
//! remaining = allowed − used   (negative once over budget)
//! delay     = remaining / refills still needed to reach period end

use crate::{
    config::GapConfig,
    coverage::CoverageSnapshot,
    period::TreatmentPeriod,
    types::Days,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GapBudget {
    pub gap_days_allowed:          Days,
    pub gap_days_used:             Days,
    pub gap_days_remaining:        Days,
    /// None when no refill is needed before period end.
    pub delay_budget_per_refill:   Option<f64>,
    pub remaining_refills_needed:  i64,
    pub coverage_shortfall:        Days,
    pub estimated_days_per_refill: Days,
}

impl GapBudget {
    /// Supply on hand already reaches the period end.
    pub fn supply_sufficient(&self) -> bool {
        self.remaining_refills_needed == 0
    }
}

/// Rounds half away from zero.
pub fn gap_days_allowed(total_days: Days, allowance_fraction: f64) -> Days {
    (total_days as f64 * allowance_fraction).round() as Days
}

/// Ceiling division of the uncovered remainder by a typical fill.
pub fn refills_needed(shortfall: Days, days_per_refill: Days) -> i64 {
    if shortfall <= 0 {
        return 0;
    }
    let per = days_per_refill.max(1);
    (shortfall + per - 1) / per
}

pub fn delay_budget(gap_days_remaining: Days, refills: i64) -> Option<f64> {
    (refills > 0).then(|| gap_days_remaining as f64 / refills as f64)
}

pub fn account(
    period: &TreatmentPeriod,
    snapshot: &CoverageSnapshot,
    estimated_days_per_refill: Option<Days>,
    cfg: &GapConfig,
) -> GapBudget {
    let allowed = gap_days_allowed(period.total_days, cfg.allowance_fraction);
    let used = snapshot.to_date.gap_days_used;
    let remaining = allowed - used;

    let per_refill = estimated_days_per_refill
        .filter(|d| *d > 0)
        .unwrap_or(cfg.default_days_supply);
    let shortfall = (snapshot.days_remaining - snapshot.supply_on_hand).max(0);
    let refills = refills_needed(shortfall, per_refill);

    GapBudget {
        gap_days_allowed:          allowed,
        gap_days_used:             used,
        gap_days_remaining:        remaining,
        delay_budget_per_refill:   delay_budget(remaining, refills),
        remaining_refills_needed:  refills,
        coverage_shortfall:        shortfall,
        estimated_days_per_refill: per_refill,
    }
}
