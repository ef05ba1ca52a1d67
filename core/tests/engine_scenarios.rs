//! End-to-end patient evaluations through the full pipeline.

use adherence_core::{
    aggregate::{AggregateTier, EvaluationOutcome},
    cache::ClassificationCache,
    clock::AsOfClock,
    config::AdherenceConfig,
    engine::{AdherenceEngine, PatientHistory, PatientReport},
    error::{AdherenceError, ValidationError},
    fill::RawFill,
    fragility::FragilityTier,
    measure::Measure,
    priority::{NoPriorityReason, PriorityOutcome, Queue},
};
use chrono::NaiveDate;

const LISINOPRIL: &str = "29046";
const LOSARTAN: &str = "52175";
const ATORVASTATIN: &str = "83367";
const METFORMIN: &str = "6809";

/// Seven 35-day fills with gaps, last supply ending Oct 30.
const SPACED_2023: [&str; 7] = [
    "2023-01-01", "2023-02-15", "2023-04-01", "2023-05-15",
    "2023-07-01", "2023-08-15", "2023-09-25",
];

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

fn fills(code: &str, dates: &[&str], days: i64) -> Vec<RawFill> {
    dates.iter().map(|s| RawFill::new(code, s, Some(days))).collect()
}

fn evaluate(history: &PatientHistory, as_of: &str) -> PatientReport {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = AdherenceEngine::new(AdherenceConfig::default());
    let mut cache = ClassificationCache::new();
    engine
        .evaluate_patient(history, &AsOfClock::new(d(as_of)), &mut cache)
        .expect("evaluation")
}

fn measure_outcome(report: &PatientReport, m: Measure) -> &EvaluationOutcome {
    &report
        .measures
        .iter()
        .find(|a| a.measure == m)
        .unwrap_or_else(|| panic!("measure {m} missing from report"))
        .outcome
}

/// 245 of 305 elapsed days covered, out of medication on Nov 1:
/// 13 gap days left over two refills → F3, 60 + 30 + 25 = 115.
#[test]
fn fragile_q4_patient_scores_high() {
    let history = PatientHistory::new("p-fragile", fills(LISINOPRIL, &SPACED_2023, 35));
    let report = evaluate(&history, "2023-11-01");

    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.period.total_days, 365);
    assert_eq!(m.coverage.covered_days, 245);
    assert_eq!(m.coverage.treatment_days, 305);
    assert_eq!(m.gap.gap_days_used, 60);
    assert_eq!(m.gap.gap_days_remaining, 13);
    assert_eq!(m.gap.remaining_refills_needed, 2);
    assert_eq!(m.gap.delay_budget_per_refill, Some(6.5));
    assert_eq!(m.days_to_runout, -2);
    assert!((m.projection.pdc_status_quo - 245.0 / 365.0).abs() < 1e-12);
    assert!((m.projection.pdc_perfect - 305.0 / 365.0).abs() < 1e-12);
    assert_eq!(m.tier, FragilityTier::F3Moderate);

    let p = m.priority.scored().expect("scored");
    assert_eq!(p.total, 115, "bonuses: {:?}", p.bonuses);
    assert_eq!(p.queue, Queue::High);

    assert_eq!(report.summary.worst_tier, AggregateTier::Tier(FragilityTier::F3Moderate));
    assert_eq!(report.summary.max_priority.map(|p| p.total), Some(115));
}

#[test]
fn second_tracked_measure_adds_multi_measure_bonus() {
    let mut raw = fills(LISINOPRIL, &SPACED_2023, 35);
    raw.extend(fills(ATORVASTATIN, &SPACED_2023, 35));
    let report = evaluate(&PatientHistory::new("p-multi", raw), "2023-11-01");

    for m in [Measure::Mac, Measure::Mah] {
        let p = measure_outcome(&report, m).priority().expect("scored");
        assert_eq!(p.bonuses.multi_measure, 15, "{m}");
        assert_eq!(p.total, 130, "{m}");
    }
    assert_eq!(report.summary.measures_tracked, 2);
    assert_eq!(report.summary.priority_measure, Some(Measure::Mac));
}

#[test]
fn unreachable_threshold_is_unsalvageable() {
    let history = PatientHistory::new(
        "p-t5",
        fills(LISINOPRIL, &["2023-01-01", "2023-03-01", "2023-05-01"], 30),
    );
    let report = evaluate(&history, "2023-09-30");

    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.coverage.covered_days, 90);
    assert_eq!(m.coverage.treatment_days, 273);
    assert!(m.projection.pdc_perfect < 0.80);
    assert_eq!(m.tier, FragilityTier::T5Unsalvageable);
    assert_eq!(
        m.priority,
        PriorityOutcome::NotPrioritized { reason: NoPriorityReason::Unsalvageable }
    );
}

/// Continuous 90-day fills: today's PDC is 100% and supply runs to
/// Dec 26, so the status quo already clears 80%.
#[test]
fn continuous_supply_is_compliant() {
    let history = PatientHistory::new(
        "p-ok",
        fills(LISINOPRIL, &["2023-01-01", "2023-04-01", "2023-06-30", "2023-09-28"], 90),
    );
    let report = evaluate(&history, "2023-11-15");

    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.coverage.pdc, 1.0);
    assert_eq!(m.supply_on_hand, 41);
    assert!((m.projection.pdc_status_quo - 360.0 / 365.0).abs() < 1e-12);
    assert_eq!(m.tier, FragilityTier::Compliant);
    assert_eq!(
        m.priority,
        PriorityOutcome::NotPrioritized { reason: NoPriorityReason::Compliant }
    );
    assert_eq!(report.summary.max_priority, None);
}

#[test]
fn single_fill_patient_is_flagged_for_second_fill() {
    let history = PatientHistory::new("p-new", fills(LISINOPRIL, &["2023-10-20"], 30));
    let report = evaluate(&history, "2023-11-01");

    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.fill_count, 1);
    assert_eq!(m.tier, FragilityTier::D1aAtRisk);
    assert_eq!(m.priority, PriorityOutcome::Urgent);
    assert!(report.summary.urgent_second_fill);
    assert_eq!(report.summary.worst_tier, AggregateTier::Tier(FragilityTier::D1aAtRisk));
}

/// Measure level merges every drug of the class; medication level
/// looks at each drug alone and may disagree.
#[test]
fn measure_union_differs_from_medication_level() {
    let mut raw = fills(LISINOPRIL, &["2023-01-01", "2023-02-14"], 30);
    raw.extend(fills(LOSARTAN, &["2023-01-15"], 30));
    let report = evaluate(&PatientHistory::new("p-union", raw), "2023-03-31");

    let mah = report.measures.iter().find(|m| m.measure == Measure::Mah).expect("MAH");
    let measure = mah.outcome.metrics().expect("measure evaluated");
    assert_eq!(measure.coverage.covered_days, 74);
    assert_eq!(measure.coverage.treatment_days, 90);
    assert_eq!(measure.fill_count, 3);
    assert_ne!(measure.tier, FragilityTier::D1aAtRisk);

    assert_eq!(mah.medications.len(), 2);
    let lisinopril = mah.medications[0].outcome.metrics().expect("lisinopril evaluated");
    assert_eq!(mah.medications[0].drug_code, LISINOPRIL);
    assert_eq!(lisinopril.coverage.covered_days, 60);
    assert_eq!(lisinopril.coverage.treatment_days, 90);

    let losartan = mah.medications[1].outcome.metrics().expect("losartan evaluated");
    assert_eq!(losartan.period.start, d("2023-01-15"));
    assert_eq!(losartan.coverage.treatment_days, 76);
    assert_eq!(losartan.tier, FragilityTier::D1aAtRisk);

    let summed = lisinopril.coverage.covered_days + losartan.coverage.covered_days;
    assert!(measure.coverage.covered_days < summed);
    assert_eq!(mah.worst_medication_tier(), Some(lisinopril.tier));
    assert!(!report.summary.urgent_second_fill, "only measure-level tiers roll up");
}

#[test]
fn insulin_use_excludes_the_diabetes_measure() {
    let mut raw = fills(METFORMIN, &["2023-01-05", "2023-02-04"], 30);
    raw.push(RawFill::new("274783", "2023-02-10", Some(30)).named("insulin glargine 100 UNT/ML"));
    let report = evaluate(&PatientHistory::new("p-insulin", raw), "2023-04-01");

    assert!(matches!(measure_outcome(&report, Measure::Mad), EvaluationOutcome::Excluded { .. }));
    assert_eq!(report.unclassified_fills, 1);
    assert_eq!(report.summary.worst_tier, AggregateTier::Excluded);
    assert_eq!(report.summary.measures_tracked, 0);
}

#[test]
fn sacubitril_combination_excludes_ras_measure() {
    let raw = vec![
        RawFill::new("1656340", "2023-01-05", Some(30)).named("sacubitril 49 MG / valsartan 51 MG"),
        RawFill::new(LISINOPRIL, "2023-02-05", Some(30)),
    ];
    let report = evaluate(&PatientHistory::new("p-arni", raw), "2023-04-01");

    let mah = report.measures.iter().find(|m| m.measure == Measure::Mah).expect("MAH");
    assert!(matches!(mah.outcome, EvaluationOutcome::Excluded { .. }));
    assert!(mah
        .medications
        .iter()
        .all(|m| matches!(m.outcome, EvaluationOutcome::Excluded { .. })));
}

/// One malformed record fails its own drug; the other measure and the
/// patient report still come back.
#[test]
fn invalid_record_is_isolated_to_its_drug() {
    let mut raw = vec![
        RawFill::new(LISINOPRIL, "2023-01-01", Some(30)),
        RawFill::new(LISINOPRIL, "2023-13-45", Some(30)),
    ];
    raw.extend(fills(ATORVASTATIN, &["2023-01-01", "2023-02-01"], 30));
    let report = evaluate(&PatientHistory::new("p-bad", raw), "2023-03-15");

    assert!(matches!(
        measure_outcome(&report, Measure::Mah),
        EvaluationOutcome::Invalid { error: ValidationError::UnparseableDate { .. } }
    ));
    assert!(measure_outcome(&report, Measure::Mac).metrics().is_some());
    assert_eq!(report.summary.measures_tracked, 2);
    assert!(matches!(report.summary.worst_tier, AggregateTier::Tier(_)));
}

#[test]
fn valid_sibling_drug_still_carries_the_measure() {
    let mut raw = vec![RawFill::new(LISINOPRIL, "2023-01-01", Some(900))];
    raw.extend(fills(LOSARTAN, &["2023-01-01", "2023-02-01"], 30));
    let report = evaluate(&PatientHistory::new("p-sibling", raw), "2023-03-15");

    let mah = report.measures.iter().find(|m| m.measure == Measure::Mah).expect("MAH");
    assert!(matches!(
        mah.medications[0].outcome,
        EvaluationOutcome::Invalid { error: ValidationError::ImplausibleDaysSupply { .. } }
    ));
    let m = mah.outcome.metrics().expect("measure evaluated from losartan");
    assert_eq!(m.fill_count, 2);
}

/// The unreadable drug is the only thing that could have put the
/// measure in the year, so the measure reports the error rather than
/// an empty period.
#[test]
fn invalid_record_outranks_an_empty_period() {
    let mut raw = vec![RawFill::new(LISINOPRIL, "2023-13-45", Some(30))];
    raw.extend(fills(LOSARTAN, &["2022-03-01", "2022-04-01"], 30));
    let report = evaluate(&PatientHistory::new("p-hidden", raw), "2023-06-01");

    assert!(matches!(
        measure_outcome(&report, Measure::Mah),
        EvaluationOutcome::Invalid { error: ValidationError::UnparseableDate { .. } }
    ));
    assert_eq!(report.summary.worst_tier, AggregateTier::Unknown);
    assert_eq!(report.summary.invalid_measures, vec![Measure::Mah]);
}

/// An overflowing supply end fails its drug; the batch around it runs on.
#[test]
fn far_future_fill_date_does_not_abort_the_batch() {
    let histories = vec![
        PatientHistory::new(
            "p-far",
            vec![
                RawFill::new(LISINOPRIL, "262142-12-20", Some(30)),
                RawFill::new(ATORVASTATIN, "2024-01-01", Some(90)),
            ],
        ),
        PatientHistory::new("p-plain", fills(LISINOPRIL, &["2024-01-01", "2024-02-01"], 30)),
    ];
    let engine = AdherenceEngine::new(AdherenceConfig::default());
    let mut cache = ClassificationCache::new();
    let outcomes =
        engine.evaluate_batch(&histories, &AsOfClock::new(d("2024-06-01")), &mut cache);

    assert_eq!(outcomes.len(), 2);
    let far = outcomes[0].result.as_ref().expect("p-far evaluated");
    assert!(matches!(
        measure_outcome(far, Measure::Mah),
        EvaluationOutcome::Invalid { error: ValidationError::DateOutOfRange { .. } }
    ));
    assert!(measure_outcome(far, Measure::Mac).metrics().is_some());
    assert!(outcomes[1].result.is_ok());
}

#[test]
fn missing_patient_id_is_fatal() {
    let engine = AdherenceEngine::new(AdherenceConfig::default());
    let mut cache = ClassificationCache::new();
    let history = PatientHistory::new("  ", fills(LISINOPRIL, &["2023-01-01"], 30));

    let err = engine
        .evaluate_patient(&history, &AsOfClock::new(d("2023-06-01")), &mut cache)
        .unwrap_err();
    assert!(matches!(err, AdherenceError::MissingPatientId), "got {err}");
}

#[test]
fn unclassified_and_explicitly_coded_fills() {
    let raw = vec![
        RawFill::new("99999", "2023-01-01", Some(30)),
        RawFill {
            measure_code: Some("mac".into()),
            ..RawFill::new("88888", "2023-01-01", Some(30))
        },
    ];
    let report = evaluate(&PatientHistory::new("p-codes", raw), "2023-03-01");

    assert_eq!(report.unclassified_fills, 1);
    assert_eq!(report.measures.len(), 1);
    assert_eq!(report.measures[0].measure, Measure::Mac);
}

#[test]
fn history_outside_measurement_year_is_insufficient_data() {
    let history = PatientHistory::new("p-old", fills(LISINOPRIL, &["2022-03-01", "2022-04-01"], 30));
    let report = evaluate(&history, "2023-06-01");

    assert_eq!(*measure_outcome(&report, Measure::Mah), EvaluationOutcome::NoFillsInPeriod);
    assert_eq!(report.summary.worst_tier, AggregateTier::Unknown);
    assert!(report.summary.insufficient_data);
}

/// Prior-year history still counts toward the new-patient check.
#[test]
fn returning_patient_gets_no_new_patient_bonus() {
    let mut raw = fills(LISINOPRIL, &["2022-11-01"], 30);
    raw.extend(fills(LISINOPRIL, &["2023-01-10", "2023-02-09"], 30));
    let report = evaluate(&PatientHistory::new("p-returning", raw), "2023-04-01");

    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.first_fill, d("2022-11-01"));
    assert_eq!(m.period.start, d("2023-01-10"));
    if let Some(p) = m.priority.scored() {
        assert_eq!(p.bonuses.new_patient, 0);
    }
}

#[test]
fn leap_year_and_enrollment_end_shape_the_period() {
    let history = PatientHistory::new("p-leap", fills(LISINOPRIL, &["2024-01-01", "2024-01-31"], 30));
    let report = evaluate(&history, "2024-03-01");
    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.period.total_days, 366);
    assert_eq!(m.gap.gap_days_allowed, 73);

    let mut disenrolled = history.clone();
    disenrolled.enrollment_end = Some(d("2024-06-30"));
    let report = evaluate(&disenrolled, "2024-03-01");
    let m = measure_outcome(&report, Measure::Mah).metrics().expect("evaluated");
    assert_eq!(m.period.total_days, 182);
    assert_eq!(m.gap.gap_days_allowed, 36);
}

#[test]
fn batch_preserves_order_and_isolates_failures() {
    let engine = AdherenceEngine::new(AdherenceConfig::default());
    let mut cache = ClassificationCache::new();
    let histories = vec![
        PatientHistory::new("p-a", fills(LISINOPRIL, &SPACED_2023, 35)),
        PatientHistory::new("", fills(LISINOPRIL, &["2023-01-01"], 30)),
        PatientHistory::new("p-c", fills(ATORVASTATIN, &["2023-10-20"], 30)),
    ];

    let out = engine.evaluate_batch(&histories, &AsOfClock::new(d("2023-11-01")), &mut cache);

    assert_eq!(out.len(), 3);
    assert_eq!(out[0].patient_id, "p-a");
    assert!(out[0].result.is_ok());
    assert!(matches!(out[1].result, Err(AdherenceError::MissingPatientId)));
    assert!(out[2].result.as_ref().expect("p-c").summary.urgent_second_fill);
    assert_eq!(cache.len(), 2);
}
