use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Record-level problems. These abort one medication's computation only.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Unparseable fill date '{value}' for drug {drug_code}")]
    UnparseableDate { drug_code: String, value: String },

    #[error("Days supply {days_supply} for drug {drug_code} exceeds maximum {max}")]
    ImplausibleDaysSupply { drug_code: String, days_supply: i64, max: i64 },

    #[error("Fill dated '{value}' for drug {drug_code} runs past the last representable date")]
    DateOutOfRange { drug_code: String, value: String },
}

#[derive(Error, Debug)]
pub enum AdherenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Patient history has no patient id")]
    MissingPatientId,

    #[error("Current result for {patient_id}/{result_key} moved past version {expected}")]
    StaleCurrentPointer {
        patient_id: String,
        result_key: String,
        expected:   i64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AdherenceResult<T> = Result<T, AdherenceError>;
