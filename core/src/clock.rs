//! As-of clock: the evaluation date and the measurement year it falls in.
//!
//! RULE: Nothing in the engine reads the wall clock.
//! Every computation takes an AsOfClock so identical inputs
//! always reproduce identical outputs.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AsOfClock {
    pub as_of:            NaiveDate,
    pub measurement_year: i32,
}

impl AsOfClock {
    /// Clock whose measurement year is the calendar year of `as_of`.
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of, measurement_year: as_of.year() }
    }

    /// Evaluate a specific measurement year, e.g. a prior-year rerun
    /// where `as_of` already lies past Dec 31.
    pub fn for_year(as_of: NaiveDate, measurement_year: i32) -> Self {
        Self { as_of, measurement_year }
    }

    pub fn year_start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.measurement_year, 1, 1)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn year_end(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.measurement_year, 12, 31)
            .unwrap_or(NaiveDate::MAX)
    }

    /// Calendar month (1..=12) of the as-of date.
    pub fn month(&self) -> u32 {
        self.as_of.month()
    }

    pub fn in_months(&self, months: &[u32]) -> bool {
        months.contains(&self.month())
    }

    /// Parse an ISO `YYYY-MM-DD` as-of date.
    pub fn parse(value: &str) -> Option<Self> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .ok()
            .map(Self::new)
    }
}
