//! Typed DTOs for the observation/storage collaborator.
//!
//! Every field the collaborator expects is a named struct field, so a
//! missing mapping is a compile error rather than a silent null.

use crate::{
    aggregate::{EvaluationOutcome, MeasureAggregate, MedicationResult},
    engine::PatientReport,
    fragility::FragilityTier,
    measure::Measure,
    priority::PriorityOutcome,
    types::{Days, DrugCode, PatientId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultScope {
    Measure,
    Medication,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Evaluated,
    InsufficientData,
    Excluded,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationDetail {
    pub rxnorm_code:               DrugCode,
    pub display_name:              Option<String>,
    pub remaining_refills:         Option<i64>,
    pub supply_on_hand:            Option<Days>,
    pub coverage_shortfall:        Option<Days>,
    pub estimated_days_per_refill: Option<Days>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceObservation {
    pub patient_id:         PatientId,
    /// Stable key the collaborator keeps one current result for.
    pub result_key:         String,
    pub scope:              ResultScope,
    pub measure_code:       Measure,
    pub as_of:              NaiveDate,
    pub status:             ObservationStatus,
    pub status_detail:      Option<String>,
    pub pdc:                Option<f64>,
    pub pdc_status_quo:     Option<f64>,
    pub pdc_perfect:        Option<f64>,
    pub covered_days:       Option<Days>,
    pub treatment_days:     Option<Days>,
    pub gap_days_used:      Option<Days>,
    pub gap_days_allowed:   Option<Days>,
    pub gap_days_remaining: Option<Days>,
    pub delay_budget:       Option<f64>,
    pub days_until_runout:  Option<Days>,
    pub fragility_tier:     Option<FragilityTier>,
    pub priority_score:     Option<i64>,
    pub urgent:             bool,
    pub q4_adjusted:        bool,
    /// Set by the storage side; a freshly built observation is current.
    pub is_current:         bool,
    pub medication:         Option<MedicationDetail>,
}

pub fn measure_key(measure: Measure) -> String {
    format!("measure:{}", measure.code())
}

pub fn medication_key(measure: Measure, drug_code: &str) -> String {
    format!("medication:{}:{}", measure.code(), drug_code)
}

fn base_observation(
    patient_id: &str,
    as_of: NaiveDate,
    result_key: String,
    scope: ResultScope,
    measure: Measure,
    outcome: &EvaluationOutcome,
) -> AdherenceObservation {
    let (status, status_detail) = match outcome {
        EvaluationOutcome::Evaluated(_)        => (ObservationStatus::Evaluated, None),
        EvaluationOutcome::NoFillsInPeriod     => (ObservationStatus::InsufficientData, None),
        EvaluationOutcome::Excluded { reason } => (ObservationStatus::Excluded, Some(reason.clone())),
        EvaluationOutcome::Invalid { error }   => (ObservationStatus::Invalid, Some(error.to_string())),
    };
    let m = outcome.metrics();
    let scored = m.and_then(|m| m.priority.scored());

    AdherenceObservation {
        patient_id: patient_id.to_string(),
        result_key,
        scope,
        measure_code: measure,
        as_of,
        status,
        status_detail,
        pdc:                m.map(|m| m.coverage.pdc),
        pdc_status_quo:     m.map(|m| m.projection.pdc_status_quo),
        pdc_perfect:        m.map(|m| m.projection.pdc_perfect),
        covered_days:       m.map(|m| m.coverage.covered_days),
        treatment_days:     m.map(|m| m.coverage.treatment_days),
        gap_days_used:      m.map(|m| m.gap.gap_days_used),
        gap_days_allowed:   m.map(|m| m.gap.gap_days_allowed),
        gap_days_remaining: m.map(|m| m.gap.gap_days_remaining),
        delay_budget:       m.and_then(|m| m.gap.delay_budget_per_refill),
        days_until_runout:  m.map(|m| m.days_to_runout),
        fragility_tier:     m.map(|m| m.tier),
        priority_score:     scored.map(|p| p.total),
        urgent:             m.is_some_and(|m| matches!(m.priority, PriorityOutcome::Urgent)),
        q4_adjusted:        scored.is_some_and(|p| p.bonuses.q4 > 0),
        is_current:         true,
        medication:         None,
    }
}

pub fn measure_observation(
    patient_id: &str,
    as_of: NaiveDate,
    aggregate: &MeasureAggregate,
) -> AdherenceObservation {
    base_observation(
        patient_id,
        as_of,
        measure_key(aggregate.measure),
        ResultScope::Measure,
        aggregate.measure,
        &aggregate.outcome,
    )
}

pub fn medication_observation(
    patient_id: &str,
    as_of: NaiveDate,
    result: &MedicationResult,
) -> AdherenceObservation {
    let mut obs = base_observation(
        patient_id,
        as_of,
        medication_key(result.measure, &result.drug_code),
        ResultScope::Medication,
        result.measure,
        &result.outcome,
    );
    let m = result.outcome.metrics();
    obs.medication = Some(MedicationDetail {
        rxnorm_code:               result.drug_code.clone(),
        display_name:              result.drug_name.clone(),
        remaining_refills:         m.map(|m| m.gap.remaining_refills_needed),
        supply_on_hand:            m.map(|m| m.supply_on_hand),
        coverage_shortfall:        m.map(|m| m.gap.coverage_shortfall),
        estimated_days_per_refill: m.map(|m| m.gap.estimated_days_per_refill),
    });
    obs
}

/// Measure rows first, then each measure's medication rows.
pub fn observations(report: &PatientReport) -> Vec<AdherenceObservation> {
    let mut out = Vec::new();
    for m in &report.measures {
        out.push(measure_observation(&report.patient_id, report.as_of, m));
    }
    for m in &report.measures {
        for med in &m.medications {
            out.push(medication_observation(&report.patient_id, report.as_of, med));
        }
    }
    out
}
