use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::drivers::DcfDrivers;
use super::map_ordered;
use super::scenarios::{ScenarioKind, ScenarioSpec};
use super::sensitivity::{build_grid, SensitivityGrid};
use crate::config::DcfConfig;
use crate::time_value::{discount_factor, gordon_terminal_value};
use crate::types::{Money, Rate};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Stages of a scenario run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcfStage {
    Idle,
    Project,
    TerminalValue,
    Discount,
    PerShare,
}

impl fmt::Display for DcfStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DcfStage::Idle => "idle",
            DcfStage::Project => "project",
            DcfStage::TerminalValue => "terminal_value",
            DcfStage::Discount => "discount",
            DcfStage::PerShare => "per_share",
        };
        f.write_str(name)
    }
}

type StageResult<T> = Result<T, (DcfStage, String)>;

/// Undiscounted cash flow build-up for one forecast year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearCashFlow {
    pub year: u32,
    pub revenue: Money,
    pub ebit: Money,
    pub tax: Money,
    pub nopat: Money,
    pub depreciation: Money,
    pub capex: Money,
    pub working_capital_change: Money,
    /// NOPAT + D&A - capex - working capital change
    pub free_cash_flow: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionYear {
    #[serde(flatten)]
    pub cash_flow: YearCashFlow,
    pub discount_factor: Decimal,
    pub present_value: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioProjection {
    pub years: Vec<ProjectionYear>,
    /// Gordon growth value at the end of the final forecast year
    pub terminal_value: Money,
    pub pv_terminal_value: Money,
    pub pv_explicit: Money,
    pub enterprise_value: Money,
    /// PV of terminal value / enterprise value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_value_share: Option<Rate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioValuation {
    pub projection: ScenarioProjection,
    pub net_debt: Money,
    pub equity_value: Money,
    pub diluted_shares: Decimal,
    pub value_per_share: Money,
}

/// Terminal state of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioStatus {
    Complete(Box<ScenarioValuation>),
    Failed { stage: DcfStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub kind: ScenarioKind,
    pub spec: ScenarioSpec,
    /// Scenario-adjusted revenue growth
    pub revenue_growth: Rate,
    /// None when no WACC was available to adjust
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wacc: Option<Rate>,
    pub terminal_growth: Rate,
    pub status: ScenarioStatus,
}

impl ScenarioResult {
    pub fn valuation(&self) -> Option<&ScenarioValuation> {
        match &self.status {
            ScenarioStatus::Complete(v) => Some(v),
            ScenarioStatus::Failed { .. } => None,
        }
    }

    pub fn value_per_share(&self) -> Option<Money> {
        self.valuation().map(|v| v.value_per_share)
    }

    pub fn is_complete(&self) -> bool {
        self.valuation().is_some()
    }
}

/// Multi-scenario valuation. Headline figures come from the base scenario
/// and are None when it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub enterprise_value: Option<Money>,
    pub equity_value: Option<Money>,
    pub value_per_share: Option<Money>,
    pub scenarios: Vec<ScenarioResult>,
    /// None when the base projection itself could not be built
    pub sensitivity: Option<SensitivityGrid>,
    pub drivers: DcfDrivers,
}

impl ValuationResult {
    pub fn scenario(&self, kind: ScenarioKind) -> Option<&ScenarioResult> {
        self.scenarios.iter().find(|s| s.kind == kind)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DcfEngine {
    config: DcfConfig,
}

impl DcfEngine {
    pub fn new(config: DcfConfig) -> Self {
        Self { config }
    }

    /// Run every configured scenario against `wacc` and build the sensitivity
    /// grid around the base scenario. Scenarios are independent; results keep
    /// the configured order.
    pub fn value(&self, drivers: &DcfDrivers, wacc: Option<Rate>) -> ValuationResult {
        let scenarios = map_ordered(&self.config.scenarios, |spec| {
            self.run_scenario(drivers, spec, wacc)
        });

        let base = scenarios.iter().find(|s| s.kind == ScenarioKind::Base);
        let headline = base.and_then(ScenarioResult::valuation);
        let sensitivity = base.and_then(|b| self.sensitivity(drivers, b));

        ValuationResult {
            enterprise_value: headline.map(|v| v.projection.enterprise_value),
            equity_value: headline.map(|v| v.equity_value),
            value_per_share: headline.map(|v| v.value_per_share),
            scenarios,
            sensitivity,
            drivers: drivers.clone(),
        }
    }

    /// Idle -> Project -> TerminalValue -> Discount -> PerShare.
    pub fn run_scenario(
        &self,
        drivers: &DcfDrivers,
        spec: &ScenarioSpec,
        wacc: Option<Rate>,
    ) -> ScenarioResult {
        let revenue_growth = drivers.revenue_growth.value * spec.growth_multiplier;
        let scenario_wacc = wacc.map(|w| w + spec.wacc_delta);

        let status = match self.evaluate(drivers, spec, scenario_wacc) {
            Ok(valuation) => {
                debug!(
                    scenario = %spec.kind,
                    value_per_share = %valuation.value_per_share,
                    "scenario complete"
                );
                ScenarioStatus::Complete(Box::new(valuation))
            }
            Err((stage, reason)) => {
                warn!(scenario = %spec.kind, %stage, %reason, "scenario failed");
                ScenarioStatus::Failed { stage, reason }
            }
        };

        ScenarioResult {
            kind: spec.kind,
            spec: spec.clone(),
            revenue_growth,
            wacc: scenario_wacc,
            terminal_growth: spec.terminal_growth,
            status,
        }
    }

    fn evaluate(
        &self,
        drivers: &DcfDrivers,
        spec: &ScenarioSpec,
        wacc: Option<Rate>,
    ) -> StageResult<ScenarioValuation> {
        // --- Idle ---
        let wacc = wacc.ok_or_else(|| (DcfStage::Idle, "WACC unavailable".to_string()))?;

        // --- Project ---
        let flows = project(drivers, spec, self.config.projection_years)
            .map_err(|reason| (DcfStage::Project, reason))?;
        let fcf: Vec<Money> = flows.iter().map(|y| y.free_cash_flow).collect();

        // --- TerminalValue / Discount ---
        let discounted = discount(&fcf, wacc, spec.terminal_growth)?;

        // --- PerShare ---
        let net_debt = drivers.net_debt.value;
        let equity_value = equity_from_enterprise(discounted.enterprise_value, net_debt)?;
        let (diluted_shares, value_per_share) = per_share(equity_value, drivers.diluted_shares)?;

        let years = flows
            .into_iter()
            .zip(discounted.factors.iter().zip(&discounted.present_values))
            .map(|(cash_flow, (df, pv))| ProjectionYear {
                cash_flow,
                discount_factor: *df,
                present_value: *pv,
            })
            .collect();
        let terminal_value_share = discounted
            .pv_terminal_value
            .checked_div(discounted.enterprise_value);

        Ok(ScenarioValuation {
            projection: ScenarioProjection {
                years,
                terminal_value: discounted.terminal_value,
                pv_terminal_value: discounted.pv_terminal_value,
                pv_explicit: discounted.pv_explicit,
                enterprise_value: discounted.enterprise_value,
                terminal_value_share,
            },
            net_debt,
            equity_value,
            diluted_shares,
            value_per_share,
        })
    }

    fn sensitivity(&self, drivers: &DcfDrivers, base: &ScenarioResult) -> Option<SensitivityGrid> {
        let wacc = base.wacc?;
        let flows = project(drivers, &base.spec, self.config.projection_years).ok()?;
        let fcf: Vec<Money> = flows.iter().map(|y| y.free_cash_flow).collect();
        Some(build_grid(
            &fcf,
            drivers.net_debt.value,
            drivers.diluted_shares,
            wacc,
            base.terminal_growth,
            &self.config.grid,
        ))
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Forecast `years` of free cash flow under the scenario adjustments.
pub(crate) fn project(
    drivers: &DcfDrivers,
    spec: &ScenarioSpec,
    years: u32,
) -> Result<Vec<YearCashFlow>, String> {
    let base_revenue = drivers
        .base_revenue
        .filter(|r| *r > Decimal::ZERO)
        .ok_or_else(|| "invalid base year".to_string())?;
    let margin = drivers
        .ebit_margin
        .as_ref()
        .ok_or_else(|| "EBIT margin unavailable".to_string())?
        .value
        * spec.margin_multiplier;
    let growth = drivers.revenue_growth.value * spec.growth_multiplier;
    let capex_pct = drivers.capex_pct_revenue.value * spec.capex_multiplier;

    let mut flows = Vec::with_capacity(years as usize);
    let mut previous_revenue = base_revenue;
    for year in 1..=years {
        let overflow = || format!("projection overflow in year {year}");
        let mul = |a: Decimal, b: Decimal| a.checked_mul(b).ok_or_else(overflow);
        let sub = |a: Decimal, b: Decimal| a.checked_sub(b).ok_or_else(overflow);

        let revenue = mul(previous_revenue, Decimal::ONE + growth)?;
        let ebit = mul(revenue, margin)?;
        let tax = mul(ebit, drivers.tax_rate)?;
        let nopat = sub(ebit, tax)?;
        let depreciation = mul(revenue, drivers.da_pct_revenue.value)?;
        let capex = mul(revenue, capex_pct)?;
        let working_capital_change = mul(
            sub(revenue, previous_revenue)?,
            drivers.wc_pct_revenue_change.value,
        )?;
        let free_cash_flow = nopat
            .checked_add(depreciation)
            .and_then(|v| v.checked_sub(capex))
            .and_then(|v| v.checked_sub(working_capital_change))
            .ok_or_else(overflow)?;
        flows.push(YearCashFlow {
            year,
            revenue,
            ebit,
            tax,
            nopat,
            depreciation,
            capex,
            working_capital_change,
            free_cash_flow,
        });
        previous_revenue = revenue;
    }
    Ok(flows)
}

pub(crate) struct Discounted {
    pub factors: Vec<Decimal>,
    pub present_values: Vec<Money>,
    pub pv_explicit: Money,
    pub terminal_value: Money,
    pub pv_terminal_value: Money,
    pub enterprise_value: Money,
}

/// Gordon terminal value on the final cash flow, then end-of-year
/// discounting of every flow and the terminal value.
pub(crate) fn discount(
    free_cash_flows: &[Money],
    wacc: Rate,
    growth: Rate,
) -> StageResult<Discounted> {
    let last = *free_cash_flows
        .last()
        .ok_or_else(|| (DcfStage::TerminalValue, "no projected cash flows".to_string()))?;
    if growth >= wacc {
        return Err((
            DcfStage::TerminalValue,
            format!("terminal growth {growth} >= WACC {wacc}: perpetuity does not converge"),
        ));
    }
    let terminal_value = gordon_terminal_value(last, growth, wacc).ok_or_else(|| {
        (
            DcfStage::TerminalValue,
            format!("terminal value overflow at growth {growth}, WACC {wacc}"),
        )
    })?;
    if wacc <= Decimal::ZERO {
        return Err((DcfStage::Discount, format!("WACC {wacc} is not positive")));
    }

    let overflow = || (DcfStage::Discount, "discounting overflow".to_string());
    let mut factors = Vec::with_capacity(free_cash_flows.len());
    let mut present_values = Vec::with_capacity(free_cash_flows.len());
    for (idx, cf) in free_cash_flows.iter().enumerate() {
        let df = discount_factor(wacc, idx as u32 + 1)
            .ok_or_else(|| (DcfStage::Discount, format!("cannot discount at {wacc}")))?;
        factors.push(df);
        present_values.push(cf.checked_mul(df).ok_or_else(overflow)?);
    }
    let final_factor = *factors
        .last()
        .ok_or_else(|| (DcfStage::Discount, "no discount factors".to_string()))?;
    let pv_explicit = present_values
        .iter()
        .try_fold(Decimal::ZERO, |acc, pv| acc.checked_add(*pv))
        .ok_or_else(overflow)?;
    let pv_terminal_value = terminal_value.checked_mul(final_factor).ok_or_else(overflow)?;
    let enterprise_value = pv_explicit
        .checked_add(pv_terminal_value)
        .ok_or_else(overflow)?;

    Ok(Discounted {
        factors,
        present_values,
        pv_explicit,
        terminal_value,
        pv_terminal_value,
        enterprise_value,
    })
}

pub(crate) fn equity_from_enterprise(
    enterprise_value: Money,
    net_debt: Money,
) -> StageResult<Money> {
    enterprise_value
        .checked_sub(net_debt)
        .ok_or_else(|| (DcfStage::PerShare, "equity value overflow".to_string()))
}

/// (shares, equity value per share)
pub(crate) fn per_share(
    equity_value: Money,
    diluted_shares: Option<Decimal>,
) -> StageResult<(Decimal, Money)> {
    match diluted_shares {
        Some(shares) if shares > Decimal::ZERO => equity_value
            .checked_div(shares)
            .map(|value| (shares, value))
            .ok_or_else(|| (DcfStage::PerShare, "per-share value overflow".to_string())),
        _ => Err((DcfStage::PerShare, "diluted shares unavailable".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sourced;
    use rust_decimal_macros::dec;

    fn drivers() -> DcfDrivers {
        DcfDrivers {
            base_revenue: Some(dec!(1000)),
            revenue_growth: Sourced::computed(dec!(0.10)),
            ebit_margin: Some(Sourced::computed(dec!(0.20))),
            tax_rate: dec!(0.25),
            da_pct_revenue: Sourced::computed(dec!(0.05)),
            capex_pct_revenue: Sourced::computed(dec!(0.06)),
            wc_pct_revenue_change: Sourced::computed(dec!(0.10)),
            net_debt: Sourced::computed(dec!(200)),
            diluted_shares: Some(dec!(100)),
        }
    }

    fn failure(result: &ScenarioResult) -> (DcfStage, &str) {
        match &result.status {
            ScenarioStatus::Failed { stage, reason } => (*stage, reason.as_str()),
            ScenarioStatus::Complete(_) => panic!("expected failure for {}", result.kind),
        }
    }

    #[test]
    fn test_first_year_build_up() {
        let flows = project(&drivers(), &ScenarioSpec::base(), 5).unwrap();
        assert_eq!(flows.len(), 5);
        let y1 = &flows[0];
        assert_eq!(y1.revenue, dec!(1100));
        assert_eq!(y1.ebit, dec!(220));
        assert_eq!(y1.tax, dec!(55));
        assert_eq!(y1.nopat, dec!(165));
        assert_eq!(y1.depreciation, dec!(55));
        assert_eq!(y1.capex, dec!(66));
        assert_eq!(y1.working_capital_change, dec!(10));
        assert_eq!(y1.free_cash_flow, dec!(144));
    }

    #[test]
    fn test_base_scenario_complete() {
        let engine = DcfEngine::default();
        let result = engine.run_scenario(&drivers(), &ScenarioSpec::base(), Some(dec!(0.09)));
        let v = result.valuation().expect("base completes");
        let p = &v.projection;
        assert_eq!(p.years.len(), 5);
        assert_eq!(p.enterprise_value, p.pv_explicit + p.pv_terminal_value);
        assert_eq!(v.equity_value, p.enterprise_value - dec!(200));
        assert_eq!(v.value_per_share, v.equity_value / dec!(100));

        // TV = FCF5 * 1.025 / 0.065
        let fcf5 = p.years[4].cash_flow.free_cash_flow;
        assert_eq!(p.terminal_value, fcf5 * dec!(1.025) / dec!(0.065));
        assert!(p.years.windows(2).all(|w| w[1].discount_factor < w[0].discount_factor));
    }

    #[test]
    fn test_terminal_growth_above_wacc_fails() {
        // 3.0% terminal growth against a 2.5% WACC
        let engine = DcfEngine::default();
        let result = engine.run_scenario(&drivers(), &ScenarioSpec::aggressive(), Some(dec!(0.045)));
        assert_eq!(result.wacc, Some(dec!(0.025)));
        let (stage, reason) = failure(&result);
        assert_eq!(stage, DcfStage::TerminalValue);
        assert!(reason.contains("does not converge"));
    }

    #[test]
    fn test_terminal_growth_equal_to_wacc_fails() {
        let engine = DcfEngine::default();
        let result = engine.run_scenario(&drivers(), &ScenarioSpec::base(), Some(dec!(0.025)));
        assert_eq!(failure(&result).0, DcfStage::TerminalValue);
    }

    #[test]
    fn test_invalid_base_year() {
        let mut d = drivers();
        d.base_revenue = Some(Decimal::ZERO);
        let result = DcfEngine::default().run_scenario(&d, &ScenarioSpec::base(), Some(dec!(0.09)));
        assert_eq!(failure(&result), (DcfStage::Project, "invalid base year"));

        d.base_revenue = None;
        let result = DcfEngine::default().run_scenario(&d, &ScenarioSpec::base(), Some(dec!(0.09)));
        assert_eq!(failure(&result), (DcfStage::Project, "invalid base year"));
    }

    #[test]
    fn test_missing_wacc_fails_at_idle() {
        let result = DcfEngine::default().run_scenario(&drivers(), &ScenarioSpec::base(), None);
        assert_eq!(failure(&result), (DcfStage::Idle, "WACC unavailable"));
        assert_eq!(result.wacc, None);
    }

    #[test]
    fn test_missing_shares_fails_at_per_share() {
        let mut d = drivers();
        d.diluted_shares = None;
        let result = DcfEngine::default().run_scenario(&d, &ScenarioSpec::base(), Some(dec!(0.09)));
        assert_eq!(failure(&result).0, DcfStage::PerShare);
    }

    #[test]
    fn test_scenarios_are_ordered_by_value() {
        let result = DcfEngine::default().value(&drivers(), Some(dec!(0.09)));
        assert_eq!(result.scenarios.len(), 3);
        let c = result.scenario(ScenarioKind::Conservative).unwrap().value_per_share().unwrap();
        let b = result.scenario(ScenarioKind::Base).unwrap().value_per_share().unwrap();
        let a = result.scenario(ScenarioKind::Aggressive).unwrap().value_per_share().unwrap();
        assert!(c < b && b < a, "{c} < {b} < {a}");
        assert_eq!(result.value_per_share, Some(b));
        assert_eq!(result.scenario(ScenarioKind::Conservative).unwrap().wacc, Some(dec!(0.11)));
    }

    #[test]
    fn test_grid_center_matches_base_scenario() {
        let result = DcfEngine::default().value(&drivers(), Some(dec!(0.09)));
        let grid = result.sensitivity.as_ref().unwrap();
        assert_eq!(grid.base_cell().and_then(|c| c.value()), result.value_per_share);
    }

    #[test]
    fn test_failed_base_leaves_headline_empty() {
        let result = DcfEngine::default().value(&drivers(), None);
        assert!(result.scenarios.iter().all(|s| !s.is_complete()));
        assert_eq!(result.value_per_share, None);
        assert!(result.sensitivity.is_none());
    }

    #[test]
    fn test_explosive_growth_fails_at_projection() {
        let mut d = drivers();
        d.revenue_growth = Sourced::computed(dec!(10000000));
        let result = DcfEngine::default().run_scenario(&d, &ScenarioSpec::base(), Some(dec!(0.09)));
        let (stage, reason) = failure(&result);
        assert_eq!(stage, DcfStage::Project);
        assert!(reason.starts_with("projection overflow"), "{reason}");
    }

    #[test]
    fn test_unrepresentable_terminal_value_fails_cleanly() {
        let flows = [Decimal::MAX / dec!(2)];
        let err = discount(&flows, dec!(0.03), dec!(0.025)).err().unwrap();
        assert_eq!(err.0, DcfStage::TerminalValue);
        assert!(err.1.contains("overflow"), "{}", err.1);
    }
}
