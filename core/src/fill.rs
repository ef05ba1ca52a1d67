//! Fill normalizer (stage 1).
//!
//! Turns raw dispense records into sorted half-open coverage intervals.
//! Non-completed and reversed fills are dropped here even when the
//! collaborator already filtered them.

use crate::{
    config::GapConfig,
    error::ValidationError,
    types::DrugCode,
};
use chrono::{DateTime, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Dispense status as reported by the FHIR collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FillStatus {
    #[default]
    Completed,
    InProgress,
    Cancelled,
    Stopped,
    Declined,
    EnteredInError,
    #[serde(other)]
    Unknown,
}

/// One dispensing event exactly as received. Immutable input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFill {
    pub drug_code:    DrugCode,
    #[serde(default)]
    pub drug_name:    Option<String>,
    /// Measure class code supplied by the collaborator, if any.
    #[serde(default)]
    pub measure_code: Option<String>,
    pub fill_date:    String,
    #[serde(default)]
    pub days_supply:  Option<i64>,
    #[serde(default)]
    pub status:       FillStatus,
    #[serde(default)]
    pub reversed:     bool,
}

impl RawFill {
    pub fn new(drug_code: &str, fill_date: &str, days_supply: Option<i64>) -> Self {
        Self {
            drug_code:    drug_code.to_string(),
            drug_name:    None,
            measure_code: None,
            fill_date:    fill_date.to_string(),
            days_supply,
            status:       FillStatus::Completed,
            reversed:     false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.drug_name = Some(name.to_string());
        self
    }

    pub fn with_status(mut self, status: FillStatus) -> Self {
        self.status = status;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == FillStatus::Completed && !self.reversed
    }
}

/// A validated fill: coverage is `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fill {
    pub start:       NaiveDate,
    pub end:         NaiveDate,
    pub days_supply: i64,
    pub drug_code:   DrugCode,
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (FHIR `whenHandedOver`).
pub fn parse_fill_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    NaiveDate::parse_from_str(v, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(v).ok().map(|dt| dt.date_naive()))
}

/// Resolve the effective days-supply of one record.
pub fn effective_days_supply(
    drug_code: &str,
    days_supply: Option<i64>,
    gap: &GapConfig,
) -> Result<i64, ValidationError> {
    match days_supply {
        Some(d) if d > gap.max_days_supply => Err(ValidationError::ImplausibleDaysSupply {
            drug_code:   drug_code.to_string(),
            days_supply: d,
            max:         gap.max_days_supply,
        }),
        Some(d) if d > 0 => Ok(d),
        _ => Ok(gap.default_days_supply),
    }
}

/// Validate and sort the completed fills in `raw`.
pub fn normalize<'a, I>(raw: I, gap: &GapConfig) -> Result<Vec<Fill>, ValidationError>
where
    I: IntoIterator<Item = &'a RawFill>,
{
    let mut fills = Vec::new();

    for record in raw.into_iter().filter(|r| r.is_completed()) {
        let start = parse_fill_date(&record.fill_date).ok_or_else(|| {
            ValidationError::UnparseableDate {
                drug_code: record.drug_code.clone(),
                value:     record.fill_date.clone(),
            }
        })?;
        let days_supply = effective_days_supply(&record.drug_code, record.days_supply, gap)?;
        let end = start
            .checked_add_signed(Duration::days(days_supply))
            .ok_or_else(|| ValidationError::DateOutOfRange {
                drug_code: record.drug_code.clone(),
                value:     record.fill_date.clone(),
            })?;

        fills.push(Fill {
            start,
            end,
            days_supply,
            drug_code: record.drug_code.clone(),
        });
    }

    fills.sort();
    Ok(fills)
}
