//! Statement-derived metrics at a resolved fiscal period: ratios, growth
//! rates and free cash flow. Nothing here raises on missing inputs; a value
//! that cannot be computed is reported absent with a reason.

pub mod free_cash_flow;
pub mod growth;
pub mod ratios;

pub use free_cash_flow::{FcfMethod, FcfOutcome, FcfSummary, FreeCashFlowCalculator};
pub use growth::{calculate_growth, GrowthEntry, GrowthMetric, GrowthSet};
pub use ratios::{calculate_ratios, RatioKind, RatioSet, RatioValue};
