//! End-to-end valuation of one security.
//!
//! [`ValuationPipeline::run`] is synchronous and pure given its inputs: the
//! market inputs (risk-free quote, sector benchmark) are passed in as frozen
//! snapshots. [`Valuator::value`] gathers those from the shared providers
//! first. Only statement-bundle problems (normalization, fiscal resolution)
//! surface as errors; everything downstream degrades into fallbacks,
//! findings and failed scenarios.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use super::dcf::{DcfEngine, ScenarioStatus, ValuationResult};
use super::drivers::DcfDrivers;
use super::scenarios::ScenarioKind;
use crate::analysis::{calculate_growth, calculate_ratios, FcfSummary, FreeCashFlowCalculator};
use crate::analysis::{GrowthSet, RatioSet};
use crate::config::ValuationConfig;
use crate::cost_of_capital::{
    regress, CostOfCapitalCalculator, DatedReturn, FactorObservation, RegressionOutcome,
    UnavailableReason, WaccBreakdown,
};
use crate::market::{BenchmarkLookup, MacroRateProvider, RateQuote, SectorBenchmarkProvider};
use crate::statements::{
    resolve, ExpectedPeriod, RawStatementBundle, ResolvedPeriod, StatementBundle,
    StatementNormalizer,
};
use crate::types::{with_metadata, ComputationOutput, Provenance, Sourced};
use crate::validation::{validate, ValidationReport};
use crate::CoreResult;

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// Per-period returns for the security and the three factors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub security: Vec<DatedReturn>,
    pub factors: Vec<FactorObservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationRequest {
    pub raw: RawStatementBundle,
    /// 0 = most recent period
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ExpectedPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnSeries>,
    #[serde(default)]
    pub run_regression: bool,
}

impl ValuationRequest {
    pub fn new(raw: RawStatementBundle) -> Self {
        Self {
            raw,
            offset: 0,
            expected: None,
            returns: None,
            run_regression: false,
        }
    }

    pub fn at_offset(mut self, offset: usize, expected: Option<ExpectedPeriod>) -> Self {
        self.offset = offset;
        self.expected = expected;
        self
    }

    pub fn with_regression(mut self, returns: ReturnSeries) -> Self {
        self.returns = Some(returns);
        self.run_regression = true;
        self
    }
}

/// Frozen market snapshots for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInputs {
    pub risk_free: RateQuote,
    pub benchmark: BenchmarkLookup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub symbol: String,
    pub period: ResolvedPeriod,
    pub validation: ValidationReport,
    /// Ratios on the gated bundle
    pub ratios: RatioSet,
    pub growth: GrowthSet,
    pub free_cash_flow: FcfSummary,
    pub regression: RegressionOutcome,
    pub wacc: WaccBreakdown,
    pub valuation: ValuationResult,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ValuationPipeline {
    config: ValuationConfig,
    normalizer: StatementNormalizer,
}

impl ValuationPipeline {
    pub fn new(config: ValuationConfig) -> Self {
        Self {
            config,
            normalizer: StatementNormalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: StatementNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &ValuationConfig {
        &self.config
    }

    /// Normalize the raw bundle and value it.
    pub fn run(
        &self,
        request: &ValuationRequest,
        market: &MarketInputs,
    ) -> CoreResult<ComputationOutput<ValuationReport>> {
        let span = info_span!("valuation", symbol = %request.raw.symbol);
        let _guard = span.enter();
        let bundle = self.normalizer.normalize(&request.raw)?;
        self.run_bundle(&bundle, request, market)
    }

    /// Value an already-normalized bundle; `request.raw` is not re-read.
    pub fn run_bundle(
        &self,
        bundle: &StatementBundle,
        request: &ValuationRequest,
        market: &MarketInputs,
    ) -> CoreResult<ComputationOutput<ValuationReport>> {
        let start = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        // --- Fiscal period ---
        let period = resolve(bundle, request.offset, request.expected)?;
        if let Some(note) = &period.note {
            warnings.push(format!("[Fiscal] {note}"));
        }

        // --- Validation gate ---
        let raw_ratios = calculate_ratios(bundle, &period);
        let validation = validate(
            bundle,
            &period,
            &raw_ratios,
            &market.benchmark,
            &self.config.validation,
        );
        warnings.extend(validation.messages());
        let gated = bundle.without(&validation.blocked_metrics());

        // --- Statement metrics ---
        let ratios = calculate_ratios(&gated, &period);
        let growth = calculate_growth(&gated, &period, self.config.growth_lookback);

        // --- Cost of capital ---
        let regression = self.regression(request);
        if let RegressionOutcome::Unavailable(reason) = &regression {
            if request.run_regression {
                warnings.push(format!("[Regression] unavailable: {reason}, using CAPM"));
            }
        }
        let wacc = CostOfCapitalCalculator::new(self.config.cost_of_capital.clone()).compute(
            &gated,
            &period,
            &regression,
            &market.risk_free,
            &market.benchmark,
        );
        warnings.extend(wacc.notes.iter().map(|n| format!("[WACC] {n}")));

        let free_cash_flow =
            FreeCashFlowCalculator::new(&gated, &period).summary(Some(wacc.tax_rate));

        // --- DCF ---
        let base_terminal_growth = self
            .config
            .dcf
            .scenarios
            .iter()
            .find(|s| s.kind == ScenarioKind::Base)
            .map(|s| s.terminal_growth)
            .unwrap_or_default();
        let drivers = DcfDrivers::from_statements(
            &gated,
            &period,
            &growth,
            wacc.tax_rate,
            base_terminal_growth,
        );
        push_driver_notes(&drivers, &mut warnings);

        let valuation = DcfEngine::new(self.config.dcf.clone()).value(&drivers, Some(wacc.wacc));
        for scenario in &valuation.scenarios {
            if let ScenarioStatus::Failed { stage, reason } = &scenario.status {
                warnings.push(format!("[DCF] {} failed at {stage}: {reason}", scenario.kind));
            }
        }

        info!(
            period_end = %period.period_end,
            wacc = %wacc.wacc,
            value_per_share = ?valuation.value_per_share,
            warnings = warnings.len(),
            "valuation complete"
        );

        let report = ValuationReport {
            symbol: bundle.symbol.clone(),
            period,
            validation,
            ratios,
            growth,
            free_cash_flow,
            regression,
            wacc,
            valuation,
        };
        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Intrinsic value: CAPM / Fama-French WACC with 3-scenario FCFF DCF",
            &serde_json::json!({
                "offset": request.offset,
                "expected_period": request.expected.map(|e| e.to_string()),
                "run_regression": request.run_regression,
                "config": &self.config,
            }),
            warnings,
            elapsed,
            report,
        ))
    }

    fn regression(&self, request: &ValuationRequest) -> RegressionOutcome {
        if !request.run_regression {
            return RegressionOutcome::Unavailable(UnavailableReason::NotRequested);
        }
        match &request.returns {
            Some(series) => regress(&series.security, &series.factors, &self.config.regression),
            None => RegressionOutcome::Unavailable(UnavailableReason::EmptyInput),
        }
    }
}

fn push_driver_notes(drivers: &DcfDrivers, warnings: &mut Vec<String>) {
    let mut note = |name: &str, provenance: &Provenance| {
        if let Some(detail) = provenance.note() {
            warnings.push(format!("[DCF] {name}: {detail}"));
        }
    };
    note("revenue growth", &drivers.revenue_growth.provenance);
    if let Some(Sourced { provenance, .. }) = &drivers.ebit_margin {
        note("EBIT margin", provenance);
    }
    note("D&A", &drivers.da_pct_revenue.provenance);
    note("capex", &drivers.capex_pct_revenue.provenance);
    note("working capital", &drivers.wc_pct_revenue_change.provenance);
    note("net debt", &drivers.net_debt.provenance);
}

// ---------------------------------------------------------------------------
// Async front door
// ---------------------------------------------------------------------------

/// Pipeline plus the shared market-data providers.
pub struct Valuator {
    pipeline: ValuationPipeline,
    rates: Arc<MacroRateProvider>,
    benchmarks: Arc<SectorBenchmarkProvider>,
}

impl Valuator {
    pub fn new(
        pipeline: ValuationPipeline,
        rates: Arc<MacroRateProvider>,
        benchmarks: Arc<SectorBenchmarkProvider>,
    ) -> Self {
        Self {
            pipeline,
            rates,
            benchmarks,
        }
    }

    /// No live rate feed and the built-in benchmark dataset.
    pub fn offline(config: ValuationConfig) -> Self {
        let rates = Arc::new(MacroRateProvider::offline(config.rates.clone()));
        let benchmarks = Arc::new(SectorBenchmarkProvider::builtin(config.benchmarks.clone()));
        Self::new(ValuationPipeline::new(config), rates, benchmarks)
    }

    pub fn pipeline(&self) -> &ValuationPipeline {
        &self.pipeline
    }

    /// Snapshot the market inputs for this request's security.
    pub async fn market_inputs(&self, industry_code: Option<&str>) -> MarketInputs {
        let risk_free = self.rates.get_rate().await;
        let benchmark = match industry_code {
            Some(code) => self.benchmarks.lookup(code).await,
            None => BenchmarkLookup::Unavailable("no industry code supplied".into()),
        };
        debug!(rate = %risk_free.rate, source = ?risk_free.source, "market inputs gathered");
        MarketInputs {
            risk_free,
            benchmark,
        }
    }

    pub async fn value(
        &self,
        request: &ValuationRequest,
    ) -> CoreResult<ComputationOutput<ValuationReport>> {
        let market = self
            .market_inputs(request.raw.industry_code.as_deref())
            .await;
        self.pipeline.run(request, &market)
    }
}
