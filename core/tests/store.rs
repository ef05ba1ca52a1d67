//! SQLite store: fill history, event log and current-result pointer.

use adherence_core::{
    adapter::{self, measure_key},
    cache::ClassificationCache,
    clock::AsOfClock,
    config::AdherenceConfig,
    engine::{AdherenceEngine, PatientHistory, PatientReport},
    error::AdherenceError,
    event::{events_for_report, AdherenceEvent},
    fill::{FillStatus, RawFill},
    fragility::FragilityTier,
    measure::Measure,
    store::AdherenceStore,
};
use chrono::NaiveDate;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

fn store() -> AdherenceStore {
    let store = AdherenceStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn history() -> PatientHistory {
    let mut h = PatientHistory::new(
        "p-store",
        vec![
            RawFill::new("29046", "2023-01-05", Some(30)).named("lisinopril 10 MG Oral Tablet"),
            RawFill::new("29046", "2023-02-10", None),
            RawFill::new("29046", "2023-03-01", Some(30)).with_status(FillStatus::Cancelled),
            RawFill::new("83367", "2023-03-20", Some(90)).reversed(),
            RawFill::new("52175", "2023-04-02T09:30:00Z", Some(30)),
        ],
    );
    h.enrollment_end = Some(d("2023-10-31"));
    h
}

fn report(history: &PatientHistory, as_of: &str) -> PatientReport {
    AdherenceEngine::new(AdherenceConfig::default())
        .evaluate_patient(history, &AsOfClock::new(d(as_of)), &mut ClassificationCache::new())
        .expect("evaluation")
}

#[test]
fn history_round_trips_with_statuses_and_enrollment() {
    let store = store();
    let original = history();
    store.save_history(&original).expect("save");

    let loaded = store.load_history("p-store").expect("load").expect("present");
    assert_eq!(loaded, original);
    assert_eq!(store.fill_count("p-store").expect("count"), 5);
    assert_eq!(store.patient_ids().expect("ids"), vec!["p-store".to_string()]);
    assert!(store.load_history("nobody").expect("load").is_none());
}

/// Re-running against the same database must not inflate fill counts:
/// a one-fill patient stays a one-fill patient.
#[test]
fn saving_the_same_history_twice_is_idempotent() {
    let store = store();
    let single = PatientHistory::new("p1", vec![RawFill::new("29046", "2024-03-01", Some(30))]);

    assert_eq!(store.save_history(&single).expect("first save"), 1);
    assert_eq!(store.save_history(&single).expect("second save"), 0);
    assert_eq!(store.fill_count("p1").expect("count"), 1);

    let loaded = store.load_history("p1").expect("load").expect("present");
    let rerun = report(&loaded, "2024-06-01");
    let mah = rerun.measures.iter().find(|m| m.measure == Measure::Mah).expect("MAH");
    assert_eq!(mah.outcome.tier(), Some(FragilityTier::D1aAtRisk));
    assert!(rerun.summary.urgent_second_fill);

    // A genuinely new dispense is still recorded; a missing supply and
    // an explicit zero default identically and count as the same fill.
    let mut grown = single.clone();
    grown.fills.push(RawFill::new("29046", "2024-04-01", None));
    assert_eq!(store.save_history(&grown).expect("grown save"), 1);
    grown.fills.push(RawFill::new("29046", "2024-04-01", Some(0)));
    assert_eq!(store.save_history(&grown).expect("same again"), 0);
    assert_eq!(store.fill_count("p1").expect("count"), 2);
}

#[test]
fn ranged_load_includes_timestamped_last_day() {
    let store = store();
    store.save_history(&history()).expect("save");

    let loaded = store
        .load_history_between("p-store", d("2023-02-01"), d("2023-04-02"))
        .expect("load")
        .expect("present");
    let dates: Vec<&str> = loaded.fills.iter().map(|f| f.fill_date.as_str()).collect();
    assert_eq!(dates, vec!["2023-02-10", "2023-03-01", "2023-03-20", "2023-04-02T09:30:00Z"]);
}

#[test]
fn republishing_keeps_exactly_one_current_row() {
    let store = store();
    let clock = AsOfClock::new(d("2023-06-01"));
    let run_a = store.insert_run(&clock, "test").expect("run a");
    let run_b = store.insert_run(&clock, "test").expect("run b");
    let h = history();
    let key = measure_key(Measure::Mah);

    let first = report(&h, "2023-05-01");
    let second = report(&h, "2023-06-01");
    let n = store.publish_report(&run_a, &first).expect("publish a");
    store.publish_report(&run_b, &second).expect("publish b");

    assert_eq!(n, adapter::observations(&first).len());
    assert_eq!(store.current_flag_count("p-store", &key).expect("flags"), 1);
    assert_eq!(store.result_history_count("p-store", &key).expect("history"), 2);
    assert_eq!(store.current_version("p-store", &key).expect("version"), Some(2));

    let current = store.current_result("p-store", &key).expect("read").expect("present");
    assert_eq!(current.as_of, d("2023-06-01"));
    assert!(current.is_current);
}

/// A writer holding an outdated version loses cleanly: nothing is
/// written and the earlier current row keeps its flag.
#[test]
fn stale_version_is_rejected_without_side_effects() {
    let store = store();
    let clock = AsOfClock::new(d("2023-06-01"));
    let run = store.insert_run(&clock, "test").expect("run");
    let obs = adapter::observations(&report(&history(), "2023-06-01")).remove(0);

    store.publish_result_if(&run, &obs, None).expect("first publish");
    store.publish_result(&run, &obs).expect("second publish");

    let err = store.publish_result_if(&run, &obs, Some(1)).unwrap_err();
    assert!(
        matches!(err, AdherenceError::StaleCurrentPointer { expected: 1, .. }),
        "got {err}"
    );
    let err = store.publish_result_if(&run, &obs, None).unwrap_err();
    assert!(matches!(err, AdherenceError::StaleCurrentPointer { .. }), "got {err}");

    assert_eq!(store.result_history_count(&obs.patient_id, &obs.result_key).expect("history"), 2);
    assert_eq!(store.current_flag_count(&obs.patient_id, &obs.result_key).expect("flags"), 1);
    assert_eq!(store.current_version(&obs.patient_id, &obs.result_key).expect("version"), Some(2));
}

#[test]
fn current_results_cover_every_key_of_the_patient() {
    let store = store();
    let run = store.insert_run(&AsOfClock::new(d("2023-06-01")), "test").expect("run");
    let r = report(&history(), "2023-06-01");
    store.publish_report(&run, &r).expect("publish");

    let current = store.current_results_for_patient("p-store").expect("read");
    let mut expected: Vec<String> =
        adapter::observations(&r).into_iter().map(|o| o.result_key).collect();
    expected.sort();
    let keys: Vec<String> = current.into_iter().map(|o| o.result_key).collect();
    assert_eq!(keys, expected);
}

#[test]
fn event_log_keeps_sequence_order() {
    let store = store();
    let clock = AsOfClock::new(d("2023-06-01"));
    let run = store.insert_run(&clock, "test").expect("run");

    let mut events = vec![AdherenceEvent::RunInitialized {
        run_id:           run.clone(),
        as_of:            clock.as_of,
        measurement_year: clock.measurement_year,
    }];
    events.extend(events_for_report(&report(&history(), "2023-06-01")));

    let next = store.append_events(&run, 0, &events).expect("append");
    assert_eq!(next, events.len() as u64);

    let log = store.events_for_run(&run).expect("read");
    assert_eq!(log.len(), events.len());
    assert_eq!(log[0].event_type, "run_initialized");
    assert_eq!(log[0].patient_id, None);
    assert_eq!(log.last().map(|e| e.event_type.as_str()), Some("patient_triaged"));
    for (i, entry) in log.iter().enumerate() {
        assert_eq!(entry.seq, i as u64);
        let expected = serde_json::to_string(&events[i]).expect("serialize");
        assert_eq!(entry.payload, expected, "entry {i}");
    }
}

#[test]
fn duplicate_sequence_number_is_a_database_error() {
    let store = store();
    let clock = AsOfClock::new(d("2023-06-01"));
    let run = store.insert_run(&clock, "test").expect("run");
    let event = AdherenceEvent::RunInitialized {
        run_id:           run.clone(),
        as_of:            clock.as_of,
        measurement_year: clock.measurement_year,
    };

    store.append_events(&run, 0, std::slice::from_ref(&event)).expect("first");
    let err = store.append_events(&run, 0, &[event]).unwrap_err();
    assert!(matches!(err, AdherenceError::Database(_)), "got {err}");
    assert_eq!(store.events_for_run(&run).expect("read").len(), 1);
}
