pub mod config;
pub mod error;
pub mod time_value;
pub mod types;

pub mod analysis;
pub mod cost_of_capital;
pub mod market;
pub mod statements;
pub mod validation;
pub mod valuation;

pub use config::ValuationConfig;
pub use error::ValuationError;
pub use types::*;

/// Standard result type for all valuation-core operations
pub type CoreResult<T> = Result<T, ValuationError>;
