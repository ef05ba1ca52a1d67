//! CMS Star-Ratings adherence measures and drug classification.
//!
//! A fill is assigned to a measure by, in order:
//!   1. an explicit measure code supplied by the dispense collaborator
//!   2. its RxNorm code appearing in a measure's value set
//!   3. an ingredient keyword appearing in its display name

use crate::config::MeasureValueSet;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measure {
    #[serde(rename = "MAC")]
    Mac, // statins
    #[serde(rename = "MAD")]
    Mad, // non-insulin diabetes medications
    #[serde(rename = "MAH")]
    Mah, // RAS antagonists
}

impl Measure {
    pub const ALL: [Measure; 3] = [Measure::Mac, Measure::Mad, Measure::Mah];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Mac => "MAC",
            Self::Mad => "MAD",
            Self::Mah => "MAH",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "MAC" => Some(Self::Mac),
            "MAD" => Some(Self::Mad),
            "MAH" => Some(Self::Mah),
            _ => None,
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Stateless classifier over the configured value sets.
/// Lookups are memoized per batch by `cache::ClassificationCache`.
#[derive(Debug, Clone)]
pub struct DrugClassifier {
    value_sets: Vec<MeasureValueSet>,
}

impl DrugClassifier {
    pub fn new(value_sets: Vec<MeasureValueSet>) -> Self {
        Self { value_sets }
    }

    pub fn classify(
        &self,
        explicit_code: Option<&str>,
        drug_code: &str,
        display_name: Option<&str>,
    ) -> Option<Measure> {
        if let Some(measure) = explicit_code.and_then(Measure::from_code) {
            return Some(measure);
        }

        let code = drug_code.trim();
        if let Some(set) = self.value_sets.iter().find(|s| s.rxnorm_codes.iter().any(|c| c == code)) {
            return Some(set.measure);
        }

        let name = display_name?.to_ascii_lowercase();
        self.value_sets
            .iter()
            .find(|s| s.ingredients.iter().any(|i| name.contains(i.as_str())))
            .map(|s| s.measure)
    }

    /// True when the display name matches one of the measure's exclusion
    /// ingredients (insulin for MAD, sacubitril for MAH).
    pub fn is_exclusion(&self, measure: Measure, display_name: Option<&str>) -> bool {
        let Some(name) = display_name.map(str::to_ascii_lowercase) else {
            return false;
        };
        self.value_sets
            .iter()
            .filter(|s| s.measure == measure)
            .flat_map(|s| s.exclusion_ingredients.iter())
            .any(|ingredient| name.contains(ingredient.as_str()))
    }

    pub fn label(&self, measure: Measure) -> &str {
        self.value_sets
            .iter()
            .find(|s| s.measure == measure)
            .map(|s| s.label.as_str())
            .unwrap_or(measure.code())
    }
}
