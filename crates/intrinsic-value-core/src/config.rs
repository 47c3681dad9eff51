//! Configuration for the valuation core.
//!
//! Every documented constant of the pipeline (equity risk premium, fallback
//! rates, clamps, cache lifetimes, scenario deltas) lives here so hosts can
//! override them from JSON or from `IVC_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::Rate;
use crate::valuation::scenarios::{ScenarioKind, ScenarioSpec};
use crate::CoreResult;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    pub cost_of_capital: CostOfCapitalConfig,
    pub regression: RegressionConfig,
    pub rates: RateProviderConfig,
    pub benchmarks: BenchmarkConfig,
    pub validation: ValidationConfig,
    pub dcf: DcfConfig,
    /// Number of periods (including the resolved one) used for growth rates
    pub growth_lookback: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostOfCapitalConfig {
    pub equity_risk_premium: Rate,
    /// Weight on the raw beta in the Blume adjustment
    pub raw_beta_weight: Decimal,
    /// Beta used when neither a regression nor the provider supplies one
    pub default_beta: Decimal,
    pub debt_spread: Rate,
    pub cost_of_debt_min: Rate,
    pub cost_of_debt_max: Rate,
    pub default_equity_weight: Rate,
    pub wacc_floor: Rate,
    pub wacc_cap: Rate,
    pub statutory_tax_rate: Rate,
    pub max_effective_tax_rate: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub min_observations: usize,
    /// Histories shorter than this (years) are sampled daily
    pub daily_below_years: u32,
    /// Histories shorter than this (years) are sampled weekly, else monthly
    pub weekly_below_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateProviderConfig {
    pub fallback_rate: Rate,
    pub plausible_min: Rate,
    pub plausible_max: Rate,
    pub ttl_secs: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub ttl_secs: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Period-over-period change above this multiple (5.0 = 500%) is flagged
    pub max_period_change: Decimal,
    pub balance_warning_tolerance: Rate,
    pub balance_error_tolerance: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcfConfig {
    pub projection_years: u32,
    pub scenarios: Vec<ScenarioSpec>,
    pub grid: GridConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub wacc_step: Rate,
    pub growth_step: Rate,
    /// Perturbations on each side of the base value (3 gives a 7x7 grid)
    pub steps_each_side: u32,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            cost_of_capital: CostOfCapitalConfig::default(),
            regression: RegressionConfig::default(),
            rates: RateProviderConfig::default(),
            benchmarks: BenchmarkConfig::default(),
            validation: ValidationConfig::default(),
            dcf: DcfConfig::default(),
            growth_lookback: 5,
        }
    }
}

impl Default for CostOfCapitalConfig {
    fn default() -> Self {
        Self {
            equity_risk_premium: dec!(0.055),
            raw_beta_weight: dec!(0.67),
            default_beta: Decimal::ONE,
            debt_spread: dec!(0.015),
            cost_of_debt_min: dec!(0.01),
            cost_of_debt_max: dec!(0.15),
            default_equity_weight: dec!(0.80),
            wacc_floor: dec!(0.05),
            wacc_cap: dec!(0.25),
            statutory_tax_rate: dec!(0.21),
            max_effective_tax_rate: dec!(0.50),
        }
    }
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            min_observations: 24,
            daily_below_years: 2,
            weekly_below_years: 5,
        }
    }
}

impl Default for RateProviderConfig {
    fn default() -> Self {
        Self {
            fallback_rate: dec!(0.045),
            plausible_min: dec!(-0.01),
            plausible_max: dec!(0.20),
            ttl_secs: 3_600,
            timeout_ms: 5_000,
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 3_600,
            timeout_ms: 5_000,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_period_change: dec!(5.0),
            balance_warning_tolerance: dec!(0.01),
            balance_error_tolerance: dec!(0.10),
        }
    }
}

impl Default for DcfConfig {
    fn default() -> Self {
        Self {
            projection_years: 5,
            scenarios: ScenarioSpec::standard_set(),
            grid: GridConfig::default(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            wacc_step: dec!(0.005),
            growth_step: dec!(0.0025),
            steps_each_side: 3,
        }
    }
}

impl RateProviderConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl BenchmarkConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ValuationConfig {
    /// Parse a JSON document; missing sections keep their defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: ValuationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overridden by `IVC_*` environment variables (and `.env`).
    pub fn from_env() -> CoreResult<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ValuationConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ValuationConfig::default();
        let coc = &mut config.cost_of_capital;
        override_from(&lookup, "IVC_EQUITY_RISK_PREMIUM", &mut coc.equity_risk_premium)?;
        override_from(&lookup, "IVC_DEBT_SPREAD", &mut coc.debt_spread)?;
        override_from(&lookup, "IVC_STATUTORY_TAX_RATE", &mut coc.statutory_tax_rate)?;
        override_from(&lookup, "IVC_WACC_FLOOR", &mut coc.wacc_floor)?;
        override_from(&lookup, "IVC_WACC_CAP", &mut coc.wacc_cap)?;
        override_from(
            &lookup,
            "IVC_DEFAULT_EQUITY_WEIGHT",
            &mut coc.default_equity_weight,
        )?;
        override_from(
            &lookup,
            "IVC_MIN_REGRESSION_OBSERVATIONS",
            &mut config.regression.min_observations,
        )?;
        override_from(&lookup, "IVC_FALLBACK_RISK_FREE", &mut config.rates.fallback_rate)?;
        override_from(&lookup, "IVC_RATE_CACHE_TTL_SECS", &mut config.rates.ttl_secs)?;
        override_from(&lookup, "IVC_FETCH_TIMEOUT_MS", &mut config.rates.timeout_ms)?;
        override_from(&lookup, "IVC_FETCH_TIMEOUT_MS", &mut config.benchmarks.timeout_ms)?;
        override_from(
            &lookup,
            "IVC_BENCHMARK_CACHE_TTL_SECS",
            &mut config.benchmarks.ttl_secs,
        )?;
        override_from(&lookup, "IVC_GROWTH_LOOKBACK", &mut config.growth_lookback)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject internally inconsistent settings.
    pub fn validate(&self) -> CoreResult<()> {
        let coc = &self.cost_of_capital;
        if coc.wacc_floor <= Decimal::ZERO || coc.wacc_floor >= coc.wacc_cap {
            return Err(invalid("wacc_floor / wacc_cap", "floor must be positive and below cap"));
        }
        if coc.cost_of_debt_min > coc.cost_of_debt_max {
            return Err(invalid(
                "cost_of_debt_min / cost_of_debt_max",
                "min must not exceed max",
            ));
        }
        if !in_unit_interval(coc.default_equity_weight) {
            return Err(invalid("default_equity_weight", "must lie in [0, 1]"));
        }
        if !in_unit_interval(coc.raw_beta_weight) {
            return Err(invalid("raw_beta_weight", "must lie in [0, 1]"));
        }
        if !in_unit_interval(coc.statutory_tax_rate) {
            return Err(invalid("statutory_tax_rate", "must lie in [0, 1]"));
        }
        if coc.equity_risk_premium < Decimal::ZERO {
            return Err(invalid("equity_risk_premium", "cannot be negative"));
        }
        // intercept + three loadings need at least five points to leave a residual dof
        if self.regression.min_observations < 5 {
            return Err(invalid("regression.min_observations", "must be at least 5"));
        }
        if self.regression.daily_below_years > self.regression.weekly_below_years {
            return Err(invalid(
                "regression.daily_below_years",
                "must not exceed weekly_below_years",
            ));
        }
        if self.rates.plausible_min >= self.rates.plausible_max {
            return Err(invalid("rates.plausible_min", "must be below plausible_max"));
        }
        if self.rates.fallback_rate < self.rates.plausible_min
            || self.rates.fallback_rate > self.rates.plausible_max
        {
            return Err(invalid("rates.fallback_rate", "must lie in the plausible band"));
        }
        if self.growth_lookback < 2 {
            return Err(invalid("growth_lookback", "needs at least 2 periods"));
        }
        if self.dcf.projection_years == 0 {
            return Err(invalid("dcf.projection_years", "must be at least 1"));
        }
        let base_count = self
            .dcf
            .scenarios
            .iter()
            .filter(|s| s.kind == ScenarioKind::Base)
            .count();
        if base_count != 1 {
            return Err(invalid(
                "dcf.scenarios",
                &format!("exactly one base scenario required, found {base_count}"),
            ));
        }
        if self.dcf.grid.wacc_step <= Decimal::ZERO || self.dcf.grid.growth_step <= Decimal::ZERO {
            return Err(invalid("dcf.grid", "steps must be positive"));
        }
        Ok(())
    }
}

fn override_from<F, T>(lookup: &F, key: &str, target: &mut T) -> CoreResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ValuationError::Config(format!("Invalid {key}: {raw}")))?;
    }
    Ok(())
}

fn in_unit_interval(v: Decimal) -> bool {
    v >= Decimal::ZERO && v <= Decimal::ONE
}

fn invalid(field: &str, reason: &str) -> ValuationError {
    ValuationError::InvalidInput {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ValuationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cost_of_capital.equity_risk_premium, dec!(0.055));
        assert_eq!(config.regression.min_observations, 24);
        assert_eq!(config.rates.ttl(), Duration::from_secs(3_600));
        assert_eq!(config.benchmarks.ttl(), Duration::from_secs(604_800));
        assert_eq!(config.dcf.scenarios.len(), 3);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("IVC_EQUITY_RISK_PREMIUM", "0.05"),
            ("IVC_MIN_REGRESSION_OBSERVATIONS", "36"),
            ("IVC_RATE_CACHE_TTL_SECS", "60"),
        ]
        .into_iter()
        .collect();
        let config =
            ValuationConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cost_of_capital.equity_risk_premium, dec!(0.05));
        assert_eq!(config.regression.min_observations, 36);
        assert_eq!(config.rates.ttl_secs, 60);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = ValuationConfig::from_lookup(|k| {
            (k == "IVC_WACC_CAP").then(|| "a lot".to_string())
        })
        .unwrap_err();
        match err {
            ValuationError::Config(msg) => assert!(msg.contains("IVC_WACC_CAP")),
            e => panic!("Expected Config error, got {e:?}"),
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            ValuationConfig::from_json_str(r#"{"cost_of_capital": {"equity_risk_premium": "0.06"}}"#)
                .unwrap();
        assert_eq!(config.cost_of_capital.equity_risk_premium, dec!(0.06));
        assert_eq!(config.cost_of_capital.debt_spread, dec!(0.015));
        assert_eq!(config.growth_lookback, 5);
    }

    #[test]
    fn test_inverted_wacc_band_rejected() {
        let mut config = ValuationConfig::default();
        config.cost_of_capital.wacc_floor = dec!(0.30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_base_scenario_rejected() {
        let mut config = ValuationConfig::default();
        config.dcf.scenarios.retain(|s| s.kind != ScenarioKind::Base);
        assert!(config.validate().is_err());
    }
}
