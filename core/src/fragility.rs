//! Fragility tier classifier (stage 6).
//!
//! Pure decision procedure, first match wins:
//!   1. fewer than `min_fills` completed fills     → D1a
//!   2. pdc_perfect below compliance threshold     → T5
//!   3. pdc_status_quo at or above the threshold   → COMPLIANT
//!   4. otherwise band by delay budget per refill  → F1..F5

use crate::config::TierThresholds;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FragilityTier {
    #[serde(rename = "T5_UNSALVAGEABLE")]
    T5Unsalvageable,
    #[serde(rename = "F1_IMMINENT")]
    F1Imminent,
    #[serde(rename = "F2_FRAGILE")]
    F2Fragile,
    #[serde(rename = "F3_MODERATE")]
    F3Moderate,
    #[serde(rename = "F4_COMFORTABLE")]
    F4Comfortable,
    #[serde(rename = "F5_SAFE")]
    F5Safe,
    #[serde(rename = "COMPLIANT")]
    Compliant,
    /// Out of band: not yet in the measure denominator.
    #[serde(rename = "D1a_AT_RISK")]
    D1aAtRisk,
}

impl FragilityTier {
    pub fn code(&self) -> &'static str {
        match self {
            Self::T5Unsalvageable => "T5_UNSALVAGEABLE",
            Self::F1Imminent      => "F1_IMMINENT",
            Self::F2Fragile       => "F2_FRAGILE",
            Self::F3Moderate      => "F3_MODERATE",
            Self::F4Comfortable   => "F4_COMFORTABLE",
            Self::F5Safe          => "F5_SAFE",
            Self::Compliant       => "COMPLIANT",
            Self::D1aAtRisk       => "D1a_AT_RISK",
        }
    }

    /// Position in the worst→best order. D1a has none.
    pub fn severity_rank(&self) -> Option<u8> {
        match self {
            Self::T5Unsalvageable => Some(0),
            Self::F1Imminent      => Some(1),
            Self::F2Fragile       => Some(2),
            Self::F3Moderate      => Some(3),
            Self::F4Comfortable   => Some(4),
            Self::F5Safe          => Some(5),
            Self::Compliant       => Some(6),
            Self::D1aAtRisk       => None,
        }
    }

    /// `Less` means `self` is more severe. None when either side is D1a.
    pub fn compare_severity(&self, other: &Self) -> Option<Ordering> {
        Some(self.severity_rank()?.cmp(&other.severity_rank()?))
    }

    /// F1..F5: tiers that carry a numeric outreach score.
    pub fn is_fragile(&self) -> bool {
        matches!(
            self,
            Self::F1Imminent | Self::F2Fragile | Self::F3Moderate
                | Self::F4Comfortable | Self::F5Safe
        )
    }
}

impl fmt::Display for FragilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierInputs {
    pub fill_count:              usize,
    pub pdc_status_quo:          f64,
    pub pdc_perfect:             f64,
    pub delay_budget_per_refill: Option<f64>,
}

pub fn classify(inputs: &TierInputs, t: &TierThresholds) -> FragilityTier {
    if inputs.fill_count < t.min_fills {
        return FragilityTier::D1aAtRisk;
    }
    if inputs.pdc_perfect < t.compliance_threshold {
        return FragilityTier::T5Unsalvageable;
    }
    if inputs.pdc_status_quo >= t.compliance_threshold {
        return FragilityTier::Compliant;
    }

    // Status quo below threshold implies a refill is needed, so a
    // missing budget only arises from inconsistent inputs.
    let Some(delay) = inputs.delay_budget_per_refill else {
        return FragilityTier::Compliant;
    };
    band(delay, t)
}

/// Map a delay budget to F1..F5 using inclusive upper bounds.
pub fn band(delay_budget: f64, t: &TierThresholds) -> FragilityTier {
    if delay_budget <= t.f1_max_delay {
        FragilityTier::F1Imminent
    } else if delay_budget <= t.f2_max_delay {
        FragilityTier::F2Fragile
    } else if delay_budget <= t.f3_max_delay {
        FragilityTier::F3Moderate
    } else if delay_budget <= t.f4_max_delay {
        FragilityTier::F4Comfortable
    } else {
        FragilityTier::F5Safe
    }
}

/// Most severe ranked tier; D1a entries are skipped.
pub fn worst<'a, I>(tiers: I) -> Option<FragilityTier>
where
    I: IntoIterator<Item = &'a FragilityTier>,
{
    tiers
        .into_iter()
        .filter_map(|t| t.severity_rank().map(|r| (r, *t)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, tier)| tier)
}
