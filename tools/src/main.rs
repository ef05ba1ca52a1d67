//! triage-runner: headless adherence batch runner.
//!
//! Usage:
//!   triage-runner --as-of 2024-11-15 --db triage.db
//!   triage-runner --as-of 2024-11-15 --fills histories.json --db triage.db
//!   triage-runner --as-of 2024-11-15 --synthetic 500 --seed 42
//!   triage-runner --as-of 2025-01-10 --year 2024 --data-dir ./data --json

use adherence_core::{
    cache::ClassificationCache,
    clock::AsOfClock,
    config::AdherenceConfig,
    engine::{AdherenceEngine, PatientHistory, PatientReport},
    event::{self, AdherenceEvent},
    priority::Queue,
    store::AdherenceStore,
    synthetic::SyntheticCohort,
    worklist::Worklist,
};
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let as_of_raw = string_arg(&args, "--as-of")
        .context("--as-of YYYY-MM-DD is required; the engine never reads the wall clock")?;
    let as_of = AsOfClock::parse(&as_of_raw)
        .with_context(|| format!("Invalid --as-of date: {as_of_raw}"))?;
    let clock = match string_arg(&args, "--year").and_then(|y| y.parse().ok()) {
        Some(year) => AsOfClock::for_year(as_of.as_of, year),
        None => as_of,
    };
    let db = string_arg(&args, "--db").unwrap_or_else(|| ":memory:".to_string());
    let data_dir = string_arg(&args, "--data-dir").unwrap_or_else(|| "./data".to_string());
    let fills_path = string_arg(&args, "--fills");
    let synthetic = parse_arg(&args, "--synthetic", 0usize);
    let seed = parse_arg(&args, "--seed", 42u64);
    let top = parse_arg(&args, "--top", 20usize);
    let json_out = args.iter().any(|a| a == "--json");

    let config = if Path::new(&data_dir).join("adherence_config.json").exists() {
        AdherenceConfig::load(&data_dir)?
    } else {
        log::warn!("No config under {data_dir}; using built-in defaults");
        AdherenceConfig::default()
    };

    if !json_out {
        println!("Adherence triage: triage-runner");
        println!("  as_of:     {}", clock.as_of);
        println!("  year:      {}", clock.measurement_year);
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let store = AdherenceStore::open(&db)?;
    store.migrate()?;
    let run_id = store.insert_run(&clock, env!("CARGO_PKG_VERSION"))?;

    // Incoming histories are written to the store first so the store
    // stays the single source of fill history.
    let incoming: Vec<PatientHistory> = match (&fills_path, synthetic) {
        (Some(path), _) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read {path}"))?;
            serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))?
        }
        (None, n) if n > 0 => SyntheticCohort::new(seed, n, clock).generate(),
        _ => Vec::new(),
    };
    let mut new_fills = 0;
    for history in &incoming {
        new_fills += store.save_history(history)?;
    }
    log::info!("{} incoming histories, {new_fills} new fills", incoming.len());
    let histories = store.load_all_histories()?;

    let engine = AdherenceEngine::new(config);
    let mut cache = ClassificationCache::new();
    let outcomes = engine.evaluate_batch(&histories, &clock, &mut cache);
    drop(cache);

    let mut seq = store.append_events(
        &run_id,
        0,
        &[AdherenceEvent::RunInitialized {
            run_id:           run_id.clone(),
            as_of:            clock.as_of,
            measurement_year: clock.measurement_year,
        }],
    )?;

    let mut reports: Vec<PatientReport> = Vec::with_capacity(outcomes.len());
    let mut failed = 0usize;
    let mut published = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(report) => {
                seq = store.append_events(&run_id, seq, &event::events_for_report(&report))?;
                published += store.publish_report(&run_id, &report)?;
                reports.push(report);
            }
            Err(e) => {
                failed += 1;
                log::error!("patient '{}' failed: {e}", outcome.patient_id);
            }
        }
    }

    let worklist = Worklist::build(&reports);

    if json_out {
        println!("{}", serde_json::to_string_pretty(&worklist)?);
    } else {
        print_summary(&run_id, &reports, &worklist, failed, published, top);
    }
    Ok(())
}

fn print_summary(
    run_id: &str,
    reports: &[PatientReport],
    worklist: &Worklist,
    failed: usize,
    published: usize,
    top: usize,
) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:            {run_id}");
    println!("  patients:          {}", reports.len() + failed);
    println!("  failed:            {failed}");
    println!("  results published: {published}");
    println!("  urgent (D1a):      {}", worklist.urgent.len());
    println!("  prioritized:       {}", worklist.prioritized.len());
    for queue in [Queue::Critical, Queue::High, Queue::Watch, Queue::Medium, Queue::Low] {
        println!("    {:<9} {}", queue.to_string(), worklist.count_in(queue));
    }
    println!("  not prioritized:   {}", worklist.not_prioritized);
    println!("  insufficient data: {}", worklist.insufficient_data.len());

    println!();
    println!("=== WORKLIST (top {top}) ===");
    if worklist.urgent.is_empty() && worklist.prioritized.is_empty() {
        println!("  (nobody needs outreach)");
    }
    for entry in &worklist.urgent {
        let measures: Vec<String> = entry.measures.iter().map(|m| m.to_string()).collect();
        println!("  URGENT   {} | 2nd fill needed: {}", entry.patient_id, measures.join(","));
    }
    for entry in worklist.prioritized.iter().take(top) {
        println!(
            "  {:<8} {} | {} | score {} | min PDC {}",
            entry.queue.to_string(),
            entry.patient_id,
            entry.measure.map(|m| m.to_string()).unwrap_or_default(),
            entry.total,
            entry
                .min_pdc
                .map(|p| format!("{:.1}%", p * 100.0))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    for id in &worklist.insufficient_data {
        println!("  UNKNOWN  {id} | insufficient data");
    }
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
