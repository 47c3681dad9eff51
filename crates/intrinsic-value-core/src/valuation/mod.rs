//! Multi-scenario DCF valuation and the end-to-end pipeline.

pub mod dcf;
pub mod drivers;
pub mod pipeline;
pub mod scenarios;
pub mod sensitivity;

pub use dcf::{
    DcfEngine, DcfStage, ProjectionYear, ScenarioProjection, ScenarioResult, ScenarioStatus,
    ScenarioValuation, ValuationResult, YearCashFlow,
};
pub use drivers::DcfDrivers;
pub use pipeline::{
    MarketInputs, ReturnSeries, ValuationPipeline, ValuationReport, ValuationRequest, Valuator,
};
pub use scenarios::{ScenarioKind, ScenarioSpec};
pub use sensitivity::{build_grid, GridCell, SensitivityGrid};

/// Map over `items` keeping their order, across the rayon pool when the
/// `parallel` feature is on.
#[cfg(feature = "parallel")]
pub(crate) fn map_ordered<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    use rayon::prelude::*;
    items.par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_ordered<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    F: Fn(&T) -> R,
{
    items.iter().map(f).collect()
}
