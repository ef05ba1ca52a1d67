//! Priority scorer (stage 7).
//!
//! total = base(tier) + triggered bonuses; the queue bucket follows
//! from total. T5, COMPLIANT and "supply already sufficient" take the
//! no-priority path; D1a is flagged URGENT outside the numeric scale.

use crate::{
    clock::AsOfClock,
    config::{PriorityConfig, QueueThresholds},
    fragility::FragilityTier,
    types::Days,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Queue {
    Critical,
    High,
    Watch,
    Medium,
    Low,
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High     => "HIGH",
            Self::Watch    => "WATCH",
            Self::Medium   => "MEDIUM",
            Self::Low      => "LOW",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bonuses {
    pub out_of_meds:   i64,
    pub q4:            i64,
    pub multi_measure: i64,
    pub new_patient:   i64,
}

impl Bonuses {
    pub fn sum(&self) -> i64 {
        self.out_of_meds + self.q4 + self.multi_measure + self.new_patient
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityResult {
    pub base_score: i64,
    pub bonuses:    Bonuses,
    pub total:      i64,
    pub queue:      Queue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoPriorityReason {
    Unsalvageable,
    Compliant,
    SupplySufficient,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorityOutcome {
    Scored(PriorityResult),
    /// D1a: second-fill outreach, independent of the numeric scale.
    Urgent,
    NotPrioritized { reason: NoPriorityReason },
}

impl PriorityOutcome {
    pub fn scored(&self) -> Option<&PriorityResult> {
        match self {
            Self::Scored(result) => Some(result),
            _ => None,
        }
    }

    pub fn total(&self) -> Option<i64> {
        self.scored().map(|r| r.total)
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Urgent)
    }
}

/// Situational facts the bonuses look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityContext {
    pub days_to_runout:           Days,
    pub remaining_refills_needed: i64,
    /// Distinct MA measures the patient is currently tracked in.
    pub tracked_measures:         usize,
    pub first_fill:               NaiveDate,
}

pub fn base_score(tier: FragilityTier, cfg: &PriorityConfig) -> Option<i64> {
    let b = &cfg.base_scores;
    match tier {
        FragilityTier::F1Imminent    => Some(b.f1),
        FragilityTier::F2Fragile     => Some(b.f2),
        FragilityTier::F3Moderate    => Some(b.f3),
        FragilityTier::F4Comfortable => Some(b.f4),
        FragilityTier::F5Safe        => Some(b.f5),
        FragilityTier::T5Unsalvageable
        | FragilityTier::Compliant
        | FragilityTier::D1aAtRisk   => None,
    }
}

pub fn bonuses(ctx: &PriorityContext, clock: &AsOfClock, cfg: &PriorityConfig) -> Bonuses {
    let v = &cfg.bonuses;
    let days_since_first = (clock.as_of - ctx.first_fill).num_days();

    Bonuses {
        out_of_meds:   if ctx.days_to_runout <= 0 { v.out_of_meds } else { 0 },
        q4:            if clock.in_months(&cfg.q4_months) { v.q4 } else { 0 },
        multi_measure: if ctx.tracked_measures >= cfg.multi_measure_min { v.multi_measure } else { 0 },
        new_patient:   if (0..=cfg.new_patient_window_days).contains(&days_since_first) {
            v.new_patient
        } else {
            0
        },
    }
}

pub fn queue_for(total: i64, q: &QueueThresholds) -> Queue {
    if total >= q.critical {
        Queue::Critical
    } else if total >= q.high {
        Queue::High
    } else if total >= q.watch {
        Queue::Watch
    } else if total >= q.medium {
        Queue::Medium
    } else {
        Queue::Low
    }
}

pub fn score(
    tier: FragilityTier,
    ctx: &PriorityContext,
    clock: &AsOfClock,
    cfg: &PriorityConfig,
    queues: &QueueThresholds,
) -> PriorityOutcome {
    match tier {
        FragilityTier::D1aAtRisk => return PriorityOutcome::Urgent,
        FragilityTier::T5Unsalvageable => {
            return PriorityOutcome::NotPrioritized { reason: NoPriorityReason::Unsalvageable }
        }
        FragilityTier::Compliant => {
            return PriorityOutcome::NotPrioritized { reason: NoPriorityReason::Compliant }
        }
        _ => {}
    }
    if ctx.remaining_refills_needed == 0 {
        return PriorityOutcome::NotPrioritized { reason: NoPriorityReason::SupplySufficient };
    }
    let Some(base) = base_score(tier, cfg) else {
        return PriorityOutcome::NotPrioritized { reason: NoPriorityReason::Compliant };
    };

    let bonuses = bonuses(ctx, clock, cfg);
    let total = base + bonuses.sum();
    PriorityOutcome::Scored(PriorityResult {
        base_score: base,
        bonuses,
        total,
        queue: queue_for(total, queues),
    })
}
