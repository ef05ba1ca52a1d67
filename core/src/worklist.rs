//! Outreach worklist built from a batch of patient reports.
//!
//! Sections, in display order:
//!   urgent:            any D1a measure, second-fill outreach
//!   prioritized:       scored patients, highest total first
//!   insufficient data: nothing usable computed, or a measure whose
//!                      history failed validation; never dropped
//! Compliant, unsalvageable and excluded patients are only counted.

use crate::{
    aggregate::AggregateTier,
    engine::PatientReport,
    fragility::FragilityTier,
    measure::Measure,
    priority::Queue,
    types::PatientId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorklistEntry {
    pub patient_id: PatientId,
    pub measure:    Option<Measure>,
    pub tier:       AggregateTier,
    pub total:      i64,
    pub queue:      Queue,
    pub min_pdc:    Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrgentEntry {
    pub patient_id: PatientId,
    pub measures:   Vec<Measure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Worklist {
    pub urgent:            Vec<UrgentEntry>,
    pub prioritized:       Vec<WorklistEntry>,
    pub insufficient_data: Vec<PatientId>,
    pub not_prioritized:   usize,
}

impl Worklist {
    pub fn build<'a, I>(reports: I) -> Self
    where
        I: IntoIterator<Item = &'a PatientReport>,
    {
        let mut list = Worklist::default();

        for report in reports {
            let s = &report.summary;

            if s.urgent_second_fill {
                let measures = report
                    .measures
                    .iter()
                    .filter(|m| m.outcome.tier() == Some(FragilityTier::D1aAtRisk))
                    .map(|m| m.measure)
                    .collect();
                list.urgent.push(UrgentEntry { patient_id: report.patient_id.clone(), measures });
            }

            match (&s.max_priority, s.worst_tier) {
                (Some(p), tier) => list.prioritized.push(WorklistEntry {
                    patient_id: report.patient_id.clone(),
                    measure:    s.priority_measure,
                    tier,
                    total:      p.total,
                    queue:      p.queue,
                    min_pdc:    s.min_pdc,
                }),
                (None, AggregateTier::Unknown) => {}
                (None, _) if s.urgent_second_fill => {}
                (None, _) => list.not_prioritized += 1,
            }

            // A measure that failed validation keeps the patient in front
            // of a reviewer even when another measure set the tier.
            if s.worst_tier == AggregateTier::Unknown || !s.invalid_measures.is_empty() {
                list.insufficient_data.push(report.patient_id.clone());
            }
        }

        list.urgent.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        list.prioritized.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then(a.queue.cmp(&b.queue))
                .then_with(|| a.patient_id.cmp(&b.patient_id))
        });
        list.insufficient_data.sort();
        list
    }

    pub fn count_in(&self, queue: Queue) -> usize {
        self.prioritized.iter().filter(|e| e.queue == queue).count()
    }
}
