//! Batch-scoped drug classification cache.
//!
//! RULE: No ambient caches. A ClassificationCache is created for one
//! batch run, passed into the engine explicitly, and dropped afterward.
//! Warm it once (single-threaded), then share it read-only across
//! workers; a miss during a parallel read classifies without inserting.

use crate::{
    fill::RawFill,
    measure::{DrugClassifier, Measure},
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClassificationKey {
    measure_code: Option<String>,
    drug_code:    String,
    drug_name:    Option<String>,
}

impl ClassificationKey {
    fn of(fill: &RawFill) -> Self {
        Self {
            measure_code: fill.measure_code.clone(),
            drug_code:    fill.drug_code.clone(),
            drug_name:    fill.drug_name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: HashMap<ClassificationKey, Option<Measure>>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify and remember every distinct drug identity in `fills`.
    pub fn warm<'a, I>(&mut self, classifier: &DrugClassifier, fills: I)
    where
        I: IntoIterator<Item = &'a RawFill>,
    {
        for fill in fills {
            self.classify(classifier, fill);
        }
    }

    pub fn classify(&mut self, classifier: &DrugClassifier, fill: &RawFill) -> Option<Measure> {
        *self
            .entries
            .entry(ClassificationKey::of(fill))
            .or_insert_with(|| {
                classifier.classify(
                    fill.measure_code.as_deref(),
                    &fill.drug_code,
                    fill.drug_name.as_deref(),
                )
            })
    }

    /// Read-only lookup; falls back to the classifier on a miss.
    pub fn lookup(&self, classifier: &DrugClassifier, fill: &RawFill) -> Option<Measure> {
        match self.entries.get(&ClassificationKey::of(fill)) {
            Some(hit) => *hit,
            None => classifier.classify(
                fill.measure_code.as_deref(),
                &fill.drug_code,
                fill.drug_name.as_deref(),
            ),
        }
    }
}
