//! Medication adherence engine: fill history in, PDC, fragility tier
//! and outreach priority out. See engine.rs for the stage order.

pub mod adapter;
pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod event;
pub mod fill;
pub mod fragility;
pub mod gap_budget;
pub mod measure;
pub mod period;
pub mod priority;
pub mod projection;
pub mod store;
pub mod synthetic;
pub mod types;
pub mod worklist;
