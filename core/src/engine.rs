//! The adherence engine. Sequences the pipeline for each patient.
//!
//! EXECUTION ORDER (fixed, per scope):
//!   1. Fill normalizer
//!   2. Treatment period resolver
//!   3. Coverage interval merger
//!   4. Gap & delay-budget accountant
//!   5. Projection engine
//!   6. Fragility tier classifier
//!   7. Priority scorer
//!   8. Measure/medication aggregator
//!
//! RULES:
//!   - Every run rebuilds all results from the fill history. Nothing
//!     is carried over from a previous run.
//!   - The engine never reads the wall clock; the AsOfClock is input.
//!   - A bad record fails its own medication only. A missing patient
//!     id is the one fatal error.
//!   - Patients are independent; batches may fan out across threads.

use crate::{
    aggregate::{
        self, AdherenceMetrics, EvaluationOutcome, MeasureAggregate, MedicationResult,
        PatientAggregate,
    },
    cache::ClassificationCache,
    clock::AsOfClock,
    config::AdherenceConfig,
    coverage,
    error::{AdherenceError, AdherenceResult, ValidationError},
    fill::{self, Fill, RawFill},
    fragility::{self, TierInputs},
    gap_budget,
    measure::{DrugClassifier, Measure},
    period::{self, PeriodBounds},
    priority::{self, PriorityContext},
    projection,
    types::{DrugCode, PatientId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One patient's fill history as handed over by the dispense store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientHistory {
    pub patient_id:     PatientId,
    pub fills:          Vec<RawFill>,
    #[serde(default)]
    pub enrollment_end: Option<NaiveDate>,
    #[serde(default)]
    pub death_date:     Option<NaiveDate>,
}

impl PatientHistory {
    pub fn new(patient_id: &str, fills: Vec<RawFill>) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            fills,
            enrollment_end: None,
            death_date: None,
        }
    }

    pub fn bounds(&self) -> PeriodBounds {
        PeriodBounds {
            enrollment_end: self.enrollment_end,
            death_date:     self.death_date,
        }
    }
}

/// Full engine output for one patient at one as-of date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientReport {
    pub patient_id:         PatientId,
    pub as_of:              NaiveDate,
    pub measurement_year:   i32,
    pub measures:           Vec<MeasureAggregate>,
    pub summary:            PatientAggregate,
    pub unclassified_fills: usize,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub patient_id: PatientId,
    pub result:     AdherenceResult<PatientReport>,
}

struct PreparedDrug {
    drug_code: DrugCode,
    drug_name: Option<String>,
    fills:     Result<Vec<Fill>, ValidationError>,
}

struct PreparedMeasure {
    measure:   Measure,
    exclusion: Option<String>,
    drugs:     Vec<PreparedDrug>,
    pooled:    Vec<Fill>,
}

pub struct AdherenceEngine {
    config:     AdherenceConfig,
    classifier: DrugClassifier,
}

impl AdherenceEngine {
    pub fn new(config: AdherenceConfig) -> Self {
        let classifier = DrugClassifier::new(config.measures.clone());
        Self { config, classifier }
    }

    pub fn config(&self) -> &AdherenceConfig {
        &self.config
    }

    pub fn classifier(&self) -> &DrugClassifier {
        &self.classifier
    }

    /// Evaluate one patient, warming `cache` with its drug codes first.
    pub fn evaluate_patient(
        &self,
        history: &PatientHistory,
        clock: &AsOfClock,
        cache: &mut ClassificationCache,
    ) -> AdherenceResult<PatientReport> {
        cache.warm(&self.classifier, &history.fills);
        self.evaluate_with(history, clock, cache)
    }

    /// Evaluate every history. Output order matches input order and a
    /// failed patient never aborts the rest of the batch.
    pub fn evaluate_batch(
        &self,
        histories: &[PatientHistory],
        clock: &AsOfClock,
        cache: &mut ClassificationCache,
    ) -> Vec<BatchOutcome> {
        cache.warm(&self.classifier, histories.iter().flat_map(|h| h.fills.iter()));
        let cache: &ClassificationCache = cache;

        let run = |history: &PatientHistory| BatchOutcome {
            patient_id: history.patient_id.clone(),
            result:     self.evaluate_with(history, clock, cache),
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<BatchOutcome> = {
            use rayon::prelude::*;
            histories.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<BatchOutcome> = histories.iter().map(run).collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        log::info!(
            "batch as_of={} year={}: {} patients, {} failed, {} cached drug identities",
            clock.as_of,
            clock.measurement_year,
            outcomes.len(),
            failed,
            cache.len(),
        );
        outcomes
    }

    /// Evaluate one patient against an already-warmed cache.
    pub fn evaluate_with(
        &self,
        history: &PatientHistory,
        clock: &AsOfClock,
        cache: &ClassificationCache,
    ) -> AdherenceResult<PatientReport> {
        let patient_id = history.patient_id.trim();
        if patient_id.is_empty() {
            return Err(AdherenceError::MissingPatientId);
        }
        let bounds = history.bounds();

        let (prepared, unclassified) = self.prepare(history, cache);

        let tracked = prepared
            .iter()
            .filter(|p| p.exclusion.is_none())
            .filter(|p| !period::in_scope(&p.pooled, clock, &bounds).is_empty())
            .count();

        let measures: Vec<MeasureAggregate> = prepared
            .into_iter()
            .map(|p| self.evaluate_measure(patient_id, p, clock, &bounds, tracked))
            .collect();

        let summary: PatientAggregate = aggregate::aggregate_patient(patient_id, &measures);

        log::info!(
            "patient {patient_id}: worst={:?} min_pdc={:?} priority={:?} urgent={}",
            summary.worst_tier,
            summary.min_pdc,
            summary.max_priority.map(|p| p.total),
            summary.urgent_second_fill,
        );

        Ok(PatientReport {
            patient_id: patient_id.to_string(),
            as_of: clock.as_of,
            measurement_year: clock.measurement_year,
            measures,
            summary,
            unclassified_fills: unclassified,
        })
    }

    /// Stages 2–7 for one scope. The caller decides the scope by which
    /// fills it passes: one drug's, or every drug of a measure.
    pub fn evaluate_fills(
        &self,
        fills: &[Fill],
        clock: &AsOfClock,
        bounds: &PeriodBounds,
        tracked_measures: usize,
    ) -> EvaluationOutcome {
        let cfg = &self.config;

        let scoped = period::in_scope(fills, clock, bounds);
        let Some(period) = period::resolve(&scoped, clock, bounds) else {
            return EvaluationOutcome::NoFillsInPeriod;
        };

        let snapshot = coverage::assess(&scoped, &period, clock.as_of);

        let latest_supply = scoped.iter().max_by_key(|f| f.start).map(|f| f.days_supply);
        let gap = gap_budget::account(&period, &snapshot, latest_supply, &cfg.gap);

        let projection = projection::project(&period, &snapshot);

        let tier = fragility::classify(
            &TierInputs {
                fill_count:              scoped.len(),
                pdc_status_quo:          projection.pdc_status_quo,
                pdc_perfect:             projection.pdc_perfect,
                delay_budget_per_refill: gap.delay_budget_per_refill,
            },
            &cfg.tiers,
        );

        let first_fill = fills
            .iter()
            .filter(|f| f.start <= clock.as_of)
            .map(|f| f.start)
            .min()
            .unwrap_or(period.start);

        let priority = priority::score(
            tier,
            &PriorityContext {
                days_to_runout:           snapshot.days_to_runout,
                remaining_refills_needed: gap.remaining_refills_needed,
                tracked_measures,
                first_fill,
            },
            clock,
            &cfg.priority,
            &cfg.queues,
        );

        EvaluationOutcome::Evaluated(Box::new(AdherenceMetrics {
            period,
            coverage: snapshot.to_date,
            gap,
            projection,
            fill_count: scoped.len(),
            supply_on_hand: snapshot.supply_on_hand,
            days_to_runout: snapshot.days_to_runout,
            first_fill,
            tier,
            priority,
        }))
    }

    /// Stage 1 plus grouping: classify, split per measure and per drug,
    /// normalize each drug on its own so one bad record stays contained.
    fn prepare(
        &self,
        history: &PatientHistory,
        cache: &ClassificationCache,
    ) -> (Vec<PreparedMeasure>, usize) {
        let mut groups: BTreeMap<Measure, BTreeMap<DrugCode, Vec<&RawFill>>> = BTreeMap::new();
        let mut unclassified = 0usize;

        for raw in &history.fills {
            match cache.lookup(&self.classifier, raw) {
                Some(measure) => groups
                    .entry(measure)
                    .or_default()
                    .entry(raw.drug_code.clone())
                    .or_default()
                    .push(raw),
                None => {
                    unclassified += 1;
                    log::debug!(
                        "patient {}: drug {} not in any measure value set",
                        history.patient_id, raw.drug_code
                    );
                }
            }
        }

        let prepared = groups
            .into_iter()
            .map(|(measure, drugs)| {
                let exclusion = history
                    .fills
                    .iter()
                    .filter(|f| f.is_completed())
                    .find(|f| self.classifier.is_exclusion(measure, f.drug_name.as_deref()))
                    .map(|f| {
                        format!(
                            "{} exclusion: {} ({})",
                            measure,
                            f.drug_name.as_deref().unwrap_or_default(),
                            f.drug_code
                        )
                    });

                let mut pooled = Vec::new();
                let drugs: Vec<PreparedDrug> = drugs
                    .into_iter()
                    .map(|(drug_code, raws)| {
                        let fills = fill::normalize(raws.iter().copied(), &self.config.gap);
                        match &fills {
                            Ok(valid) => pooled.extend(valid.iter().cloned()),
                            Err(e) => log::warn!(
                                "patient {}: rejecting drug {drug_code}: {e}",
                                history.patient_id
                            ),
                        }
                        PreparedDrug {
                            drug_name: raws.iter().find_map(|r| r.drug_name.clone()),
                            drug_code,
                            fills,
                        }
                    })
                    .collect();
                pooled.sort();

                PreparedMeasure { measure, exclusion, drugs, pooled }
            })
            .collect();

        (prepared, unclassified)
    }

    fn evaluate_measure(
        &self,
        patient_id: &str,
        prepared: PreparedMeasure,
        clock: &AsOfClock,
        bounds: &PeriodBounds,
        tracked: usize,
    ) -> MeasureAggregate {
        let PreparedMeasure { measure, exclusion, drugs, pooled } = prepared;

        if let Some(reason) = exclusion {
            log::debug!("patient {patient_id}: {reason}");
            let medications = drugs
                .into_iter()
                .map(|d| MedicationResult {
                    measure,
                    drug_code: d.drug_code,
                    drug_name: d.drug_name,
                    outcome:   EvaluationOutcome::Excluded { reason: reason.clone() },
                })
                .collect();
            return MeasureAggregate {
                measure,
                outcome: EvaluationOutcome::Excluded { reason },
                medications,
            };
        }

        let mut first_error: Option<ValidationError> = None;
        let medications: Vec<MedicationResult> = drugs
            .into_iter()
            .map(|d| {
                let outcome = match d.fills {
                    Ok(fills) => self.evaluate_fills(&fills, clock, bounds, tracked),
                    Err(error) => {
                        first_error.get_or_insert_with(|| error.clone());
                        EvaluationOutcome::Invalid { error }
                    }
                };
                log::debug!(
                    "patient {patient_id}: {measure}/{} tier={:?} pdc={:?}",
                    d.drug_code,
                    outcome.tier(),
                    outcome.pdc(),
                );
                MedicationResult {
                    measure,
                    drug_code: d.drug_code,
                    drug_name: d.drug_name,
                    outcome,
                }
            })
            .collect();

        // A rejected record outranks "no fills": the measure cannot
        // claim the year is empty when part of its history was unreadable.
        let outcome = match (first_error, self.evaluate_fills(&pooled, clock, bounds, tracked)) {
            (Some(error), EvaluationOutcome::NoFillsInPeriod) => EvaluationOutcome::Invalid { error },
            (_, outcome) => outcome,
        };
        log::debug!(
            "patient {patient_id}: {measure} tier={:?} pdc={:?} priority={:?}",
            outcome.tier(),
            outcome.pdc(),
            outcome.priority().map(|p| p.total),
        );

        MeasureAggregate { measure, outcome, medications }
    }
}
