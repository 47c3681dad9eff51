use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Statement data unavailable: {0}")]
    DataUnavailable(String),

    #[error(
        "Fiscal period mismatch: expected {expected}, resolved {resolved} ({periods_apart} period(s) apart)"
    )]
    FiscalMismatch {
        expected: String,
        resolved: NaiveDate,
        periods_apart: i64,
    },

    #[error("Fiscal offset {offset} out of range: bundle has {available} period(s)")]
    OffsetOutOfRange { offset: usize, available: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ValuationError {
    fn from(e: serde_json::Error) -> Self {
        ValuationError::SerializationError(e.to_string())
    }
}
