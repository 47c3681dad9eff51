use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Multiples and ratios (e.g., 1.3998 debt-to-equity)
pub type Multiple = Decimal;

/// How a number was obtained.
///
/// Every figure the core hands back is either computed from the statements,
/// backed by an identified fallback, or explicitly unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Provenance {
    Computed,
    Fallback(String),
    Unavailable(String),
}

impl Provenance {
    pub fn fallback(label: impl Into<String>) -> Self {
        Provenance::Fallback(label.into())
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::Fallback(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Provenance::Unavailable(_))
    }

    /// Fallback label or unavailability reason; `None` when computed.
    pub fn note(&self) -> Option<&str> {
        match self {
            Provenance::Computed => None,
            Provenance::Fallback(s) | Provenance::Unavailable(s) => Some(s),
        }
    }
}

/// A value paired with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Sourced<T> {
    pub fn computed(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Computed,
        }
    }

    pub fn fallback(value: T, label: impl Into<String>) -> Self {
        Self {
            value,
            provenance: Provenance::fallback(label),
        }
    }

    /// No source exists; `value` is the neutral stand-in used downstream.
    pub fn unavailable(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            provenance: Provenance::Unavailable(reason.into()),
        }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
