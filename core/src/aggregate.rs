//! Measure/medication aggregator (stage 8).
//!
//! Worst case wins: the patient roll-up takes the most severe ranked
//! tier, the minimum PDC and the maximum priority score across every
//! tracked measure, so a healthy measure never masks an at-risk one.

use crate::{
    coverage::CoverageResult,
    error::ValidationError,
    fragility::{self, FragilityTier},
    gap_budget::GapBudget,
    measure::Measure,
    period::TreatmentPeriod,
    priority::{PriorityOutcome, PriorityResult},
    projection::Projection,
    types::{Days, DrugCode, PatientId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything the pipeline derives for one scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceMetrics {
    pub period:         TreatmentPeriod,
    pub coverage:       CoverageResult,
    pub gap:            GapBudget,
    pub projection:     Projection,
    pub fill_count:     usize,
    pub supply_on_hand: Days,
    pub days_to_runout: Days,
    pub first_fill:     NaiveDate,
    pub tier:           FragilityTier,
    pub priority:       PriorityOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Evaluated(Box<AdherenceMetrics>),
    /// No completed fill falls inside the measurement year.
    NoFillsInPeriod,
    /// Measure exclusion criteria met (e.g. insulin use for MAD).
    Excluded { reason: String },
    /// A record failed validation; nothing was computed.
    Invalid { error: ValidationError },
}

impl EvaluationOutcome {
    pub fn metrics(&self) -> Option<&AdherenceMetrics> {
        match self {
            Self::Evaluated(m) => Some(m),
            _ => None,
        }
    }

    pub fn tier(&self) -> Option<FragilityTier> {
        self.metrics().map(|m| m.tier)
    }

    pub fn pdc(&self) -> Option<f64> {
        self.metrics().map(|m| m.coverage.pdc)
    }

    pub fn priority(&self) -> Option<&PriorityResult> {
        self.metrics().and_then(|m| m.priority.scored())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationResult {
    pub measure:   Measure,
    pub drug_code: DrugCode,
    pub drug_name: Option<String>,
    pub outcome:   EvaluationOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureAggregate {
    pub measure:     Measure,
    /// Measure-level (HEDIS union) result.
    pub outcome:     EvaluationOutcome,
    pub medications: Vec<MedicationResult>,
}

impl MeasureAggregate {
    /// Worst medication-level tier inside this measure. Reported for
    /// audit next to the measure-level tier, which is authoritative.
    pub fn worst_medication_tier(&self) -> Option<FragilityTier> {
        let tiers: Vec<FragilityTier> = self
            .medications
            .iter()
            .filter_map(|m| m.outcome.tier())
            .collect();
        fragility::worst(&tiers)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "tier", rename_all = "snake_case")]
pub enum AggregateTier {
    Tier(FragilityTier),
    /// Every tracked measure is excluded.
    Excluded,
    /// Measures exist but none produced a usable result, or there are
    /// no measures at all. Rendered as "insufficient data".
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientAggregate {
    pub patient_id:         PatientId,
    pub worst_tier:         AggregateTier,
    pub min_pdc:            Option<f64>,
    pub max_priority:       Option<PriorityResult>,
    pub priority_measure:   Option<Measure>,
    /// Any measure is D1a: second-fill outreach regardless of score.
    pub urgent_second_fill: bool,
    pub measures_tracked:   usize,
    /// No tracked measure produced a tier.
    pub insufficient_data:  bool,
    /// Tracked measures whose history failed validation, even when
    /// another measure still set the tier.
    #[serde(default)]
    pub invalid_measures:   Vec<Measure>,
}

impl PatientAggregate {
    /// Needs a data review: nothing evaluated, or some measure could
    /// not be computed.
    pub fn needs_data_review(&self) -> bool {
        self.insufficient_data || !self.invalid_measures.is_empty()
    }
}

pub fn aggregate_patient(patient_id: &str, measures: &[MeasureAggregate]) -> PatientAggregate {
    let active: Vec<&MeasureAggregate> = measures
        .iter()
        .filter(|m| !matches!(m.outcome, EvaluationOutcome::Excluded { .. }))
        .collect();

    let tiers: Vec<FragilityTier> = active.iter().filter_map(|m| m.outcome.tier()).collect();
    let urgent = tiers.contains(&FragilityTier::D1aAtRisk);

    let worst_tier = match fragility::worst(&tiers) {
        Some(t) => AggregateTier::Tier(t),
        None if urgent => AggregateTier::Tier(FragilityTier::D1aAtRisk),
        None if !measures.is_empty() && active.is_empty() => AggregateTier::Excluded,
        None => AggregateTier::Unknown,
    };

    let min_pdc = active
        .iter()
        .filter_map(|m| m.outcome.pdc())
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));

    // Ties keep the first measure in MAC, MAD, MAH order.
    let mut max_priority: Option<(Measure, PriorityResult)> = None;
    for m in &active {
        if let Some(p) = m.outcome.priority() {
            if max_priority.map_or(true, |(_, best)| p.total > best.total) {
                max_priority = Some((m.measure, *p));
            }
        }
    }

    let insufficient_data = !active.is_empty() && tiers.is_empty();
    if insufficient_data {
        log::warn!(
            "patient {patient_id}: {} measure(s) tracked but none evaluated",
            active.len()
        );
    }

    let invalid_measures: Vec<Measure> = active
        .iter()
        .filter(|m| matches!(m.outcome, EvaluationOutcome::Invalid { .. }))
        .map(|m| m.measure)
        .collect();
    if !invalid_measures.is_empty() && !insufficient_data {
        log::warn!("patient {patient_id}: invalid history for {invalid_measures:?}");
    }

    PatientAggregate {
        patient_id:         patient_id.to_string(),
        worst_tier,
        min_pdc,
        max_priority:       max_priority.map(|(_, p)| p),
        priority_measure:   max_priority.map(|(m, _)| m),
        urgent_second_fill: urgent,
        measures_tracked:   active.len(),
        insufficient_data,
        invalid_measures,
    }
}
