//! Engine event log.
//!
//! RULE: Events are derived from a finished PatientReport, never
//! emitted mid-computation, so the engine itself stays pure.
//! The order is fixed: rejected fills, medications, measures, patient.

use crate::{
    aggregate::{AggregateTier, EvaluationOutcome},
    engine::PatientReport,
    fragility::FragilityTier,
    measure::Measure,
    priority::Queue,
    types::{DrugCode, PatientId, RunId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdherenceEvent {
    RunInitialized {
        run_id:           RunId,
        as_of:            NaiveDate,
        measurement_year: i32,
    },
    FillRejected {
        patient_id: PatientId,
        drug_code:  DrugCode,
        reason:     String,
    },
    MedicationEvaluated {
        patient_id: PatientId,
        measure:    Measure,
        drug_code:  DrugCode,
        tier:       Option<FragilityTier>,
        pdc:        Option<f64>,
    },
    MeasureEvaluated {
        patient_id:     PatientId,
        measure:        Measure,
        tier:           Option<FragilityTier>,
        pdc:            Option<f64>,
        priority_total: Option<i64>,
        excluded:       bool,
    },
    PatientTriaged {
        patient_id:   PatientId,
        worst_tier:   AggregateTier,
        max_priority: Option<i64>,
        queue:        Option<Queue>,
        urgent:       bool,
        #[serde(default)]
        data_review:  bool,
    },
}

/// A persisted row in the event_log table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub seq:        u64,
    pub patient_id: Option<PatientId>,
    pub event_type: String,
    pub payload:    String,
}

impl EventLogEntry {
    pub fn new(run_id: &str, seq: u64, event: &AdherenceEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id:         None,
            run_id:     run_id.to_string(),
            seq,
            patient_id: event.patient_id().map(str::to_string),
            event_type: event_type_name(event).to_string(),
            payload:    serde_json::to_string(event)?,
        })
    }
}

impl AdherenceEvent {
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Self::RunInitialized { .. } => None,
            Self::FillRejected { patient_id, .. }
            | Self::MedicationEvaluated { patient_id, .. }
            | Self::MeasureEvaluated { patient_id, .. }
            | Self::PatientTriaged { patient_id, .. } => Some(patient_id.as_str()),
        }
    }
}

/// Stable string name for the event_type column.
pub fn event_type_name(event: &AdherenceEvent) -> &'static str {
    match event {
        AdherenceEvent::RunInitialized { .. }      => "run_initialized",
        AdherenceEvent::FillRejected { .. }        => "fill_rejected",
        AdherenceEvent::MedicationEvaluated { .. } => "medication_evaluated",
        AdherenceEvent::MeasureEvaluated { .. }    => "measure_evaluated",
        AdherenceEvent::PatientTriaged { .. }      => "patient_triaged",
    }
}

pub fn events_for_report(report: &PatientReport) -> Vec<AdherenceEvent> {
    let patient_id = &report.patient_id;
    let mut events = Vec::new();

    for m in &report.measures {
        for med in &m.medications {
            if let EvaluationOutcome::Invalid { error } = &med.outcome {
                events.push(AdherenceEvent::FillRejected {
                    patient_id: patient_id.clone(),
                    drug_code:  med.drug_code.clone(),
                    reason:     error.to_string(),
                });
            }
        }
    }

    for m in &report.measures {
        for med in &m.medications {
            events.push(AdherenceEvent::MedicationEvaluated {
                patient_id: patient_id.clone(),
                measure:    med.measure,
                drug_code:  med.drug_code.clone(),
                tier:       med.outcome.tier(),
                pdc:        med.outcome.pdc(),
            });
        }
    }

    for m in &report.measures {
        events.push(AdherenceEvent::MeasureEvaluated {
            patient_id:     patient_id.clone(),
            measure:        m.measure,
            tier:           m.outcome.tier(),
            pdc:            m.outcome.pdc(),
            priority_total: m.outcome.priority().map(|p| p.total),
            excluded:       matches!(m.outcome, EvaluationOutcome::Excluded { .. }),
        });
    }

    let s = &report.summary;
    events.push(AdherenceEvent::PatientTriaged {
        patient_id:   patient_id.clone(),
        worst_tier:   s.worst_tier,
        max_priority: s.max_priority.map(|p| p.total),
        queue:        s.max_priority.map(|p| p.queue),
        urgent:       s.urgent_second_fill,
        data_review:  s.needs_data_review(),
    });

    events
}
