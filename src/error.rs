//! Fatal error cases for a pipeline run.
//!
//! Everything recoverable (a skipped file, a bad cell, a missing reference)
//! is reported through the run report instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no spreadsheet files (*.xls*) found under {0}")]
    NoInputFiles(PathBuf),

    #[error("no valid files after normalization; check the synonym table and required columns")]
    NoValidFiles,

    #[error("invalid month bound {0:?}: expected YYYY-MM")]
    InvalidMonth(String),

    #[error("month range is empty: start {start} is after end {end}")]
    EmptyMonthRange { start: String, end: String },

    #[error("unknown canonical field {target:?} for synonym {label:?}")]
    UnknownCanonicalField { label: String, target: String },

    #[error("country code {0:?} not found on the reference server")]
    CountryNotFound(String),
}
