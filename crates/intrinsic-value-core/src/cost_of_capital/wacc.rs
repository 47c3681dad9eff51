use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::regression::RegressionOutcome;
use crate::config::CostOfCapitalConfig;
use crate::market::{BenchmarkLookup, RateQuote, RateSource};
use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};
use crate::types::{Money, Rate};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostOfEquitySource {
    /// Implied by the three-factor regression
    FamaFrench3,
    #[serde(rename = "CAPM")]
    Capm,
}

impl fmt::Display for CostOfEquitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostOfEquitySource::FamaFrench3 => f.write_str("FamaFrench3"),
            CostOfEquitySource::Capm => f.write_str("CAPM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSource {
    Regression,
    Provider,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostOfDebtSource {
    /// Interest expense / total debt
    Implied,
    /// Risk-free plus a fixed spread
    RiskFreePlusSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    MarketValue,
    DefaultSplit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRateSource {
    Effective,
    Statutory,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalStructure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_debt: Option<Money>,
    pub equity_weight: Rate,
    pub debt_weight: Rate,
    pub source: WeightSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaccBreakdown {
    pub cost_of_equity: Rate,
    pub cost_of_equity_source: CostOfEquitySource,
    /// CAPM figure, kept for comparison even when the regression is used
    pub capm_cost_of_equity: Rate,
    pub cost_of_debt: Rate,
    pub cost_of_debt_source: CostOfDebtSource,
    pub capital_structure: CapitalStructure,
    pub tax_rate: Rate,
    pub tax_rate_source: TaxRateSource,
    pub risk_free_rate: Rate,
    pub risk_free_source: RateSource,
    pub raw_beta: Decimal,
    pub beta_source: BetaSource,
    pub adjusted_beta: Decimal,
    pub wacc_pre_clamp: Rate,
    /// Always within the configured [floor, cap] band
    pub wacc: Rate,
    pub clamped: bool,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Blume adjustment: weight * raw + (1 - weight), shrinking toward 1.0.
pub fn adjusted_beta(raw: Decimal, raw_weight: Decimal) -> Decimal {
    raw_weight * raw + (Decimal::ONE - raw_weight)
}

#[derive(Debug, Clone, Default)]
pub struct CostOfCapitalCalculator {
    config: CostOfCapitalConfig,
}

impl CostOfCapitalCalculator {
    pub fn new(config: CostOfCapitalConfig) -> Self {
        Self { config }
    }

    /// Discount rate for the security at `period`.
    ///
    /// Every missing input has a fallback and every sub-component records
    /// which source backed it. Never fails.
    pub fn compute(
        &self,
        bundle: &StatementBundle,
        period: &ResolvedPeriod,
        regression: &RegressionOutcome,
        risk_free: &RateQuote,
        benchmark: &BenchmarkLookup,
    ) -> WaccBreakdown {
        let cfg = &self.config;
        let mut notes = Vec::new();
        let rf = risk_free.rate;
        if risk_free.is_fallback() {
            notes.push(format!(
                "risk-free rate {rf} is the static fallback ({})",
                risk_free.reason.as_deref().unwrap_or("live source unavailable")
            ));
        }

        // --- Beta ---
        let regression = regression.result();
        let (raw_beta, beta_source) = match (regression, bundle.market.beta) {
            (Some(r), _) => (r.market.estimate, BetaSource::Regression),
            (None, Some(b)) if b > Decimal::ZERO => (b, BetaSource::Provider),
            _ => {
                notes.push(format!("no beta available, using {}", cfg.default_beta));
                (cfg.default_beta, BetaSource::Default)
            }
        };
        let adj_beta = adjusted_beta(raw_beta, cfg.raw_beta_weight);

        // --- Cost of equity ---
        let capm = rf + adj_beta * cfg.equity_risk_premium;
        let (cost_of_equity, cost_of_equity_source) = match regression {
            Some(r) if r.implied_cost_of_equity > Decimal::ZERO => {
                (r.implied_cost_of_equity, CostOfEquitySource::FamaFrench3)
            }
            Some(r) => {
                notes.push(format!(
                    "regression implied cost of equity {} is not positive, using CAPM",
                    r.implied_cost_of_equity
                ));
                (capm, CostOfEquitySource::Capm)
            }
            None => (capm, CostOfEquitySource::Capm),
        };

        // --- Cost of debt ---
        let at = |item: LineItem| bundle.value(item, period.period_end);
        let total_debt = at(LineItem::TotalDebt).map(|d| d.max(Decimal::ZERO));
        let implied_kd = match (at(LineItem::InterestExpense), total_debt) {
            (Some(interest), Some(debt)) if debt > Decimal::ZERO => Some(interest.abs() / debt),
            _ => None,
        };
        let (cost_of_debt, cost_of_debt_source) = match implied_kd {
            Some(kd) if kd >= cfg.cost_of_debt_min && kd <= cfg.cost_of_debt_max => {
                (kd, CostOfDebtSource::Implied)
            }
            other => {
                if let Some(kd) = other {
                    notes.push(format!(
                        "implied cost of debt {kd} outside [{}, {}], using risk-free + spread",
                        cfg.cost_of_debt_min, cfg.cost_of_debt_max
                    ));
                }
                (rf + cfg.debt_spread, CostOfDebtSource::RiskFreePlusSpread)
            }
        };

        // --- Weights ---
        let capital_structure = self.capital_structure(bundle, total_debt, &mut notes);

        // --- Tax rate ---
        let effective = match (at(LineItem::IncomeTaxExpense), at(LineItem::PretaxIncome)) {
            (Some(tax), Some(pretax)) if pretax > Decimal::ZERO => Some(tax / pretax),
            _ => None,
        };
        let (tax_rate, tax_rate_source) = match effective {
            Some(t) if t >= Decimal::ZERO && t <= cfg.max_effective_tax_rate => {
                (t, TaxRateSource::Effective)
            }
            _ => (cfg.statutory_tax_rate, TaxRateSource::Statutory),
        };

        // --- WACC ---
        let wacc_pre_clamp = capital_structure.equity_weight * cost_of_equity
            + capital_structure.debt_weight * cost_of_debt * (Decimal::ONE - tax_rate);
        let wacc = wacc_pre_clamp.clamp(cfg.wacc_floor, cfg.wacc_cap);
        let clamped = wacc != wacc_pre_clamp;
        if clamped {
            warn!(
                symbol = %bundle.symbol,
                pre_clamp = %wacc_pre_clamp,
                wacc = %wacc,
                "WACC clamped to plausible band"
            );
            notes.push(format!(
                "WACC {wacc_pre_clamp} clamped to [{}, {}]",
                cfg.wacc_floor, cfg.wacc_cap
            ));
        }

        if let Some(b) = benchmark.benchmark() {
            if b.wacc_contains(wacc) == Some(false) {
                if let Some(range) = b.wacc_range {
                    notes.push(format!(
                        "WACC {wacc} outside the typical {} range [{}, {}]",
                        b.name, range.min, range.max
                    ));
                }
            }
        }

        debug!(
            symbol = %bundle.symbol,
            %wacc,
            cost_of_equity = %cost_of_equity,
            source = %cost_of_equity_source,
            "cost of capital computed"
        );

        WaccBreakdown {
            cost_of_equity,
            cost_of_equity_source,
            capm_cost_of_equity: capm,
            cost_of_debt,
            cost_of_debt_source,
            capital_structure,
            tax_rate,
            tax_rate_source,
            risk_free_rate: rf,
            risk_free_source: risk_free.source,
            raw_beta,
            beta_source,
            adjusted_beta: adj_beta,
            wacc_pre_clamp,
            wacc,
            clamped,
            notes,
        }
    }

    fn capital_structure(
        &self,
        bundle: &StatementBundle,
        total_debt: Option<Money>,
        notes: &mut Vec<String>,
    ) -> CapitalStructure {
        let market = &bundle.market;
        let market_cap = market.market_cap.or_else(|| {
            let derived = market.share_price? * market.diluted_shares?;
            notes.push("market cap derived from share price x diluted shares".into());
            Some(derived)
        });

        match market_cap {
            Some(cap) if cap > Decimal::ZERO => {
                let debt = total_debt.unwrap_or_else(|| {
                    notes.push("total debt unavailable, treated as zero in weights".into());
                    Decimal::ZERO
                });
                let equity_weight = cap / (cap + debt);
                CapitalStructure {
                    market_cap: Some(cap),
                    total_debt,
                    equity_weight,
                    debt_weight: Decimal::ONE - equity_weight,
                    source: WeightSource::MarketValue,
                }
            }
            _ => {
                let equity_weight = self.config.default_equity_weight;
                notes.push(format!(
                    "market cap unavailable, using default {equity_weight} equity weight"
                ));
                CapitalStructure {
                    market_cap,
                    total_debt,
                    equity_weight,
                    debt_weight: Decimal::ONE - equity_weight,
                    source: WeightSource::DefaultSplit,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost_of_capital::regression::{
        FactorLoading, RegressionResult, SamplingFrequency, UnavailableReason,
    };
    use crate::market::BenchmarkDataset;
    use crate::statements::resolve;
    use crate::statements::test_support::bundle_from;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn live(rate: Rate) -> RateQuote {
        RateQuote::live(rate, Utc::now())
    }

    fn no_regression() -> RegressionOutcome {
        RegressionOutcome::Unavailable(UnavailableReason::NotRequested)
    }

    fn no_benchmark() -> BenchmarkLookup {
        BenchmarkLookup::Unavailable("none".into())
    }

    fn loading(name: &str, estimate: Decimal) -> FactorLoading {
        FactorLoading {
            factor: name.into(),
            estimate,
            std_error: dec!(0.05),
            t_stat: None,
            p_value: None,
            annual_premium: dec!(0.05),
        }
    }

    fn regression_with(beta: Decimal, implied: Rate) -> RegressionOutcome {
        RegressionOutcome::Available(Box::new(RegressionResult {
            alpha: dec!(0.001),
            alpha_annualized: dec!(0.012),
            alpha_t_stat: None,
            alpha_p_value: None,
            market: loading("market", beta),
            size: loading("smb", dec!(0.2)),
            value: loading("hml", dec!(-0.1)),
            r_squared: dec!(0.6),
            adjusted_r_squared: dec!(0.58),
            residual_std_error: dec!(0.03),
            frequency: SamplingFrequency::Monthly,
            sample_size: 60,
            annual_risk_free: dec!(0.04),
            implied_cost_of_equity: implied,
        }))
    }

    fn bundle_with_beta(beta: Option<Decimal>) -> StatementBundle {
        let mut bundle = bundle_from(
            2023,
            &[
                (LineItem::TotalDebt, &[dec!(200)]),
                (LineItem::InterestExpense, &[dec!(10)]),
                (LineItem::PretaxIncome, &[dec!(100)]),
                (LineItem::IncomeTaxExpense, &[dec!(21)]),
            ],
        );
        bundle.market.beta = beta;
        bundle.market.market_cap = Some(dec!(800));
        bundle
    }

    fn compute(bundle: &StatementBundle, regression: &RegressionOutcome, rf: Rate) -> WaccBreakdown {
        let period = resolve(bundle, 0, None).unwrap();
        CostOfCapitalCalculator::default().compute(bundle, &period, regression, &live(rf), &no_benchmark())
    }

    #[test]
    fn test_capm_worked_example() {
        let bundle = bundle_with_beta(Some(dec!(1.24)));
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        assert_eq!(w.adjusted_beta, dec!(1.1608));
        assert_eq!(w.cost_of_equity, dec!(0.10884));
        assert_eq!(w.cost_of_equity_source, CostOfEquitySource::Capm);
        assert_eq!(w.beta_source, BetaSource::Provider);
    }

    #[test]
    fn test_small_sample_falls_back_to_capm() {
        let bundle = bundle_with_beta(Some(dec!(1.24)));
        let outcome = RegressionOutcome::Unavailable(UnavailableReason::InsufficientSample {
            observed: 18,
            required: 24,
        });
        let w = compute(&bundle, &outcome, dec!(0.045));
        assert_eq!(w.cost_of_equity_source, CostOfEquitySource::Capm);
        assert_eq!(w.cost_of_equity_source.to_string(), "CAPM");
        assert_eq!(
            serde_json::to_value(w.cost_of_equity_source).unwrap(),
            serde_json::json!("CAPM")
        );
    }

    #[test]
    fn test_regression_preferred_when_available() {
        let bundle = bundle_with_beta(Some(dec!(0.8)));
        let w = compute(&bundle, &regression_with(dec!(1.3), dec!(0.11)), dec!(0.045));
        assert_eq!(w.cost_of_equity, dec!(0.11));
        assert_eq!(w.cost_of_equity_source, CostOfEquitySource::FamaFrench3);
        assert_eq!(w.raw_beta, dec!(1.3));
        assert_eq!(w.beta_source, BetaSource::Regression);
    }

    #[test]
    fn test_non_positive_implied_cost_uses_capm() {
        let bundle = bundle_with_beta(None);
        let w = compute(&bundle, &regression_with(dec!(1.0), dec!(-0.01)), dec!(0.045));
        assert_eq!(w.cost_of_equity_source, CostOfEquitySource::Capm);
        assert_eq!(w.cost_of_equity, dec!(0.045) + dec!(0.055));
    }

    #[test]
    fn test_adjusted_beta_properties() {
        let w = dec!(0.67);
        assert_eq!(adjusted_beta(Decimal::ONE, w), Decimal::ONE);
        assert!(adjusted_beta(dec!(0.5), w) > dec!(0.5));
        assert!(adjusted_beta(dec!(1.8), w) < dec!(1.8));
    }

    #[test]
    fn test_cost_of_debt_implied_and_fallback() {
        let bundle = bundle_with_beta(None);
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        assert_eq!(w.cost_of_debt, dec!(0.05));
        assert_eq!(w.cost_of_debt_source, CostOfDebtSource::Implied);

        // 40 / 200 = 20%, outside the band
        let mut expensive = bundle_from(
            2023,
            &[
                (LineItem::TotalDebt, &[dec!(200)]),
                (LineItem::InterestExpense, &[dec!(-40)]),
            ],
        );
        expensive.market.market_cap = Some(dec!(800));
        let w = compute(&expensive, &no_regression(), dec!(0.045));
        assert_eq!(w.cost_of_debt, dec!(0.06));
        assert_eq!(w.cost_of_debt_source, CostOfDebtSource::RiskFreePlusSpread);
    }

    #[test]
    fn test_weights_market_and_default() {
        let bundle = bundle_with_beta(None);
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        assert_eq!(w.capital_structure.equity_weight, dec!(0.8));
        assert_eq!(w.capital_structure.debt_weight, dec!(0.2));
        assert_eq!(w.capital_structure.source, WeightSource::MarketValue);

        let mut no_market = bundle_with_beta(None);
        no_market.market.market_cap = None;
        let w = compute(&no_market, &no_regression(), dec!(0.045));
        assert_eq!(w.capital_structure.source, WeightSource::DefaultSplit);
        assert_eq!(
            w.capital_structure.equity_weight + w.capital_structure.debt_weight,
            Decimal::ONE
        );
    }

    #[test]
    fn test_market_cap_derived_from_price_and_shares() {
        let mut bundle = bundle_with_beta(None);
        bundle.market.market_cap = None;
        bundle.market.share_price = Some(dec!(20));
        bundle.market.diluted_shares = Some(dec!(40));
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        assert_eq!(w.capital_structure.market_cap, Some(dec!(800)));
        assert_eq!(w.capital_structure.source, WeightSource::MarketValue);
    }

    #[test]
    fn test_tax_rate_effective_or_statutory() {
        let bundle = bundle_with_beta(None);
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        assert_eq!(w.tax_rate, dec!(0.21));
        assert_eq!(w.tax_rate_source, TaxRateSource::Effective);

        let mut loss = bundle_from(
            2023,
            &[
                (LineItem::PretaxIncome, &[dec!(-100)]),
                (LineItem::IncomeTaxExpense, &[dec!(5)]),
            ],
        );
        loss.market.market_cap = Some(dec!(1000));
        let w = compute(&loss, &no_regression(), dec!(0.045));
        assert_eq!(w.tax_rate_source, TaxRateSource::Statutory);
    }

    #[test]
    fn test_wacc_formula_and_clamp() {
        let bundle = bundle_with_beta(Some(Decimal::ONE));
        let w = compute(&bundle, &no_regression(), dec!(0.045));
        // 0.8 * 0.10 + 0.2 * 0.05 * 0.79
        assert_eq!(w.wacc, dec!(0.0879));
        assert!(!w.clamped);

        let hot = compute(&bundle, &regression_with(dec!(3), dec!(0.60)), dec!(0.045));
        assert_eq!(hot.wacc, dec!(0.25));
        assert!(hot.clamped);
        assert!(hot.wacc_pre_clamp > dec!(0.25));
    }

    #[test]
    fn test_benchmark_range_note() {
        let bundle = bundle_with_beta(Some(Decimal::ONE));
        let period = resolve(&bundle, 0, None).unwrap();
        let utilities = BenchmarkLookup::Available(
            BenchmarkDataset::builtin().get("utilities").cloned().unwrap(),
        );
        let w = CostOfCapitalCalculator::default().compute(
            &bundle,
            &period,
            &no_regression(),
            &live(dec!(0.045)),
            &utilities,
        );
        assert!(w.notes.iter().any(|n| n.contains("Utilities")));
    }

    #[test]
    fn test_fallback_rate_noted() {
        let bundle = bundle_with_beta(Some(Decimal::ONE));
        let period = resolve(&bundle, 0, None).unwrap();
        let quote = RateQuote::fallback(dec!(0.045), "timeout");
        let w = CostOfCapitalCalculator::default().compute(
            &bundle,
            &period,
            &no_regression(),
            &quote,
            &no_benchmark(),
        );
        assert_eq!(w.risk_free_source, RateSource::Fallback);
        assert!(w.notes.iter().any(|n| n.contains("fallback")));
    }
}
