//! Shared primitive types used across the entire engine.

/// A stable patient identifier as issued by the fill-history store.
pub type PatientId = String;

/// Drug identity on a fill record (RxNorm or equivalent code).
pub type DrugCode = String;

/// The canonical batch run identifier.
pub type RunId = String;

/// A signed day count. Gap and runout arithmetic may go negative.
pub type Days = i64;
