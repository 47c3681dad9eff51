//! Discount rate: three-factor regression and WACC assembly.

pub mod regression;
pub mod wacc;

pub use regression::{
    regress, DatedReturn, FactorLoading, FactorObservation, FactorRegressionEngine,
    RegressionOutcome, RegressionResult, SamplingFrequency, UnavailableReason,
};
pub use wacc::{
    adjusted_beta, BetaSource, CapitalStructure, CostOfCapitalCalculator, CostOfDebtSource,
    CostOfEquitySource, TaxRateSource, WaccBreakdown, WeightSource,
};
