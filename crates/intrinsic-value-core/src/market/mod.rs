//! Cross-request market inputs: the risk-free rate and sector benchmarks,
//! each behind a time-bounded snapshot cache.

pub mod benchmarks;
pub mod cache;
pub mod macro_rates;

pub use benchmarks::{
    BenchmarkDataset, BenchmarkLookup, BenchmarkRange, BenchmarkSource, SectorBenchmark,
    SectorBenchmarkProvider,
};
pub use cache::{Served, Snapshot, SnapshotCache};
pub use macro_rates::{MacroRateProvider, RateObservation, RateQuote, RateSource, RiskFreeSource};
