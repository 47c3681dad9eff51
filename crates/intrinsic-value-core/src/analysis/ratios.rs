//! Financial ratios at one resolved period.
//!
//! Ratios are decimals (0.25 = 25%), each retained with its numerator and
//! denominator. A ratio whose input is missing, or whose denominator is zero,
//! is listed under `unavailable` with the reason; it is never reported as 0.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};
use crate::types::{Money, Multiple};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioKind {
    GrossMargin,
    OperatingMargin,
    NetMargin,
    EbitdaMargin,
    ReturnOnEquity,
    ReturnOnAssets,
    /// Total liabilities / total equity
    DebtToEquity,
    /// Total (financial) debt / total equity
    FinancialDebtToEquity,
    CurrentRatio,
    InterestCoverage,
    EffectiveTaxRate,
    CapexIntensity,
    FcfMargin,
}

impl RatioKind {
    pub const ALL: [RatioKind; 13] = [
        RatioKind::GrossMargin,
        RatioKind::OperatingMargin,
        RatioKind::NetMargin,
        RatioKind::EbitdaMargin,
        RatioKind::ReturnOnEquity,
        RatioKind::ReturnOnAssets,
        RatioKind::DebtToEquity,
        RatioKind::FinancialDebtToEquity,
        RatioKind::CurrentRatio,
        RatioKind::InterestCoverage,
        RatioKind::EffectiveTaxRate,
        RatioKind::CapexIntensity,
        RatioKind::FcfMargin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RatioKind::GrossMargin => "gross_margin",
            RatioKind::OperatingMargin => "operating_margin",
            RatioKind::NetMargin => "net_margin",
            RatioKind::EbitdaMargin => "ebitda_margin",
            RatioKind::ReturnOnEquity => "return_on_equity",
            RatioKind::ReturnOnAssets => "return_on_assets",
            RatioKind::DebtToEquity => "debt_to_equity",
            RatioKind::FinancialDebtToEquity => "financial_debt_to_equity",
            RatioKind::CurrentRatio => "current_ratio",
            RatioKind::InterestCoverage => "interest_coverage",
            RatioKind::EffectiveTaxRate => "effective_tax_rate",
            RatioKind::CapexIntensity => "capex_intensity",
            RatioKind::FcfMargin => "fcf_margin",
        }
    }

    /// Wide plausibility band used when no sector benchmark is available.
    pub fn generic_range(&self) -> (Decimal, Decimal) {
        match self {
            RatioKind::GrossMargin => (dec!(-0.5), dec!(1.0)),
            RatioKind::OperatingMargin => (dec!(-1.0), dec!(0.7)),
            RatioKind::NetMargin => (dec!(-1.0), dec!(0.6)),
            RatioKind::EbitdaMargin => (dec!(-1.0), dec!(0.8)),
            RatioKind::ReturnOnEquity => (dec!(-1.0), dec!(1.0)),
            RatioKind::ReturnOnAssets => (dec!(-0.5), dec!(0.5)),
            RatioKind::DebtToEquity => (dec!(0), dec!(10)),
            RatioKind::FinancialDebtToEquity => (dec!(0), dec!(6)),
            RatioKind::CurrentRatio => (dec!(0.2), dec!(10)),
            RatioKind::InterestCoverage => (dec!(-10), dec!(200)),
            RatioKind::EffectiveTaxRate => (dec!(0), dec!(0.5)),
            RatioKind::CapexIntensity => (dec!(0), dec!(0.6)),
            RatioKind::FcfMargin => (dec!(-1.0), dec!(0.6)),
        }
    }
}

impl fmt::Display for RatioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A computed ratio with the figures it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioValue {
    pub value: Multiple,
    pub numerator: Money,
    pub denominator: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioSet {
    pub values: BTreeMap<RatioKind, RatioValue>,
    /// Ratio → reason it could not be computed
    pub unavailable: BTreeMap<RatioKind, String>,
}

impl RatioSet {
    pub fn get(&self, kind: RatioKind) -> Option<Multiple> {
        self.values.get(&kind).map(|r| r.value)
    }

    pub fn reason(&self, kind: RatioKind) -> Option<&str> {
        self.unavailable.get(&kind).map(String::as_str)
    }

    fn record(&mut self, kind: RatioKind, outcome: Result<RatioValue, String>) {
        match outcome {
            Ok(v) => {
                self.values.insert(kind, v);
            }
            Err(reason) => {
                self.unavailable.insert(kind, reason);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require(value: Option<Decimal>, item: LineItem) -> Result<Decimal, String> {
    value.ok_or_else(|| format!("{item} missing"))
}

fn divide(numerator: Decimal, denominator: Decimal, what: &str) -> Result<RatioValue, String> {
    if denominator.is_zero() {
        return Err(format!("{what} is zero"));
    }
    Ok(RatioValue {
        value: numerator / denominator,
        numerator,
        denominator,
    })
}

/// Denominator that must be strictly positive for the ratio to mean anything.
fn positive_equity(equity: Option<Decimal>) -> Result<Decimal, String> {
    let equity = require(equity, LineItem::TotalEquity)?;
    if equity < Decimal::ZERO {
        return Err("negative equity".into());
    }
    Ok(equity)
}

// ---------------------------------------------------------------------------
// Core function
// ---------------------------------------------------------------------------

/// Compute every ratio at `period`. Never fails.
pub fn calculate_ratios(bundle: &StatementBundle, period: &ResolvedPeriod) -> RatioSet {
    let at = |item: LineItem| bundle.value(item, period.period_end);

    let revenue = at(LineItem::Revenue);
    let net_income = at(LineItem::NetIncome);
    let operating_income = at(LineItem::OperatingIncome);
    let equity = at(LineItem::TotalEquity);
    let capex = at(LineItem::CapitalExpenditure);

    let gross_profit = at(LineItem::GrossProfit).or_else(|| {
        let cost = at(LineItem::CostOfRevenue)?;
        Some(revenue? - cost.abs())
    });

    let mut set = RatioSet::default();

    let margin = |numerator: Result<Decimal, String>| -> Result<RatioValue, String> {
        let r = require(revenue, LineItem::Revenue)?;
        divide(numerator?, r, "revenue")
    };

    set.record(
        RatioKind::GrossMargin,
        margin(gross_profit.ok_or_else(|| "gross_profit missing".to_string())),
    );
    set.record(
        RatioKind::OperatingMargin,
        margin(require(operating_income, LineItem::OperatingIncome)),
    );
    set.record(
        RatioKind::NetMargin,
        margin(require(net_income, LineItem::NetIncome)),
    );
    set.record(
        RatioKind::EbitdaMargin,
        margin((|| -> Result<Decimal, String> {
            let ebit = require(operating_income, LineItem::OperatingIncome)?;
            let da = require(at(LineItem::DepreciationAmortization), LineItem::DepreciationAmortization)?;
            Ok(ebit + da.abs())
        })()),
    );

    set.record(
        RatioKind::ReturnOnEquity,
        (|| -> Result<RatioValue, String> {
            let ni = require(net_income, LineItem::NetIncome)?;
            divide(ni, positive_equity(equity)?, "total_equity")
        })(),
    );
    set.record(
        RatioKind::ReturnOnAssets,
        (|| -> Result<RatioValue, String> {
            let ni = require(net_income, LineItem::NetIncome)?;
            let assets = require(at(LineItem::TotalAssets), LineItem::TotalAssets)?;
            divide(ni, assets, "total_assets")
        })(),
    );
    set.record(
        RatioKind::DebtToEquity,
        (|| -> Result<RatioValue, String> {
            let liabilities = require(at(LineItem::TotalLiabilities), LineItem::TotalLiabilities)?;
            divide(liabilities, positive_equity(equity)?, "total_equity")
        })(),
    );
    set.record(
        RatioKind::FinancialDebtToEquity,
        (|| -> Result<RatioValue, String> {
            let debt = require(at(LineItem::TotalDebt), LineItem::TotalDebt)?;
            divide(debt, positive_equity(equity)?, "total_equity")
        })(),
    );
    set.record(
        RatioKind::CurrentRatio,
        (|| -> Result<RatioValue, String> {
            let ca = require(at(LineItem::CurrentAssets), LineItem::CurrentAssets)?;
            let cl = require(at(LineItem::CurrentLiabilities), LineItem::CurrentLiabilities)?;
            divide(ca, cl, "current_liabilities")
        })(),
    );
    set.record(
        RatioKind::InterestCoverage,
        (|| -> Result<RatioValue, String> {
            let ebit = require(operating_income, LineItem::OperatingIncome)?;
            let interest = require(at(LineItem::InterestExpense), LineItem::InterestExpense)?;
            divide(ebit, interest.abs(), "interest_expense")
        })(),
    );
    set.record(
        RatioKind::EffectiveTaxRate,
        (|| -> Result<RatioValue, String> {
            let tax = require(at(LineItem::IncomeTaxExpense), LineItem::IncomeTaxExpense)?;
            let pretax = require(at(LineItem::PretaxIncome), LineItem::PretaxIncome)?;
            if pretax < Decimal::ZERO {
                return Err("negative pretax income".into());
            }
            divide(tax, pretax, "pretax_income")
        })(),
    );
    set.record(
        RatioKind::CapexIntensity,
        margin(require(capex, LineItem::CapitalExpenditure).map(|c| c.abs())),
    );
    set.record(
        RatioKind::FcfMargin,
        margin((|| -> Result<Decimal, String> {
            let ocf = require(at(LineItem::OperatingCashFlow), LineItem::OperatingCashFlow)?;
            let capex = require(capex, LineItem::CapitalExpenditure)?;
            Ok(ocf - capex.abs())
        })()),
    );

    set
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statements::resolve;
    use crate::statements::test_support::bundle_from;

    fn ratios_for(rows: &[(LineItem, &[Decimal])]) -> RatioSet {
        let bundle = bundle_from(2023, rows);
        let period = resolve(&bundle, 0, None).unwrap();
        calculate_ratios(&bundle, &period)
    }

    #[test]
    fn test_debt_to_equity_decimal_placement() {
        let set = ratios_for(&[
            (LineItem::TotalLiabilities, &[dec!(2531247000)]),
            (LineItem::TotalEquity, &[dec!(1808327000)]),
        ]);
        let de = set.get(RatioKind::DebtToEquity).unwrap();
        assert!(
            (de - dec!(1.3998)).abs() < dec!(0.0001),
            "D/E should be 1.3998, got {de}"
        );
        let retained = set.values[&RatioKind::DebtToEquity];
        assert_eq!(retained.numerator, dec!(2531247000));
        assert_eq!(retained.denominator, dec!(1808327000));
    }

    #[test]
    fn test_margins_are_decimals() {
        let set = ratios_for(&[
            (LineItem::Revenue, &[dec!(1000)]),
            (LineItem::CostOfRevenue, &[dec!(-600)]),
            (LineItem::OperatingIncome, &[dec!(250)]),
            (LineItem::DepreciationAmortization, &[dec!(50)]),
            (LineItem::NetIncome, &[dec!(150)]),
        ]);
        assert_eq!(set.get(RatioKind::GrossMargin), Some(dec!(0.4)));
        assert_eq!(set.get(RatioKind::OperatingMargin), Some(dec!(0.25)));
        assert_eq!(set.get(RatioKind::EbitdaMargin), Some(dec!(0.3)));
        assert_eq!(set.get(RatioKind::NetMargin), Some(dec!(0.15)));
    }

    #[test]
    fn test_zero_denominator_is_absent_not_zero() {
        let set = ratios_for(&[
            (LineItem::Revenue, &[dec!(0)]),
            (LineItem::NetIncome, &[dec!(10)]),
            (LineItem::TotalEquity, &[dec!(0)]),
        ]);
        assert_eq!(set.get(RatioKind::NetMargin), None);
        assert_eq!(set.reason(RatioKind::NetMargin), Some("revenue is zero"));
        assert_eq!(set.get(RatioKind::ReturnOnEquity), None);
        assert!(set.reason(RatioKind::ReturnOnEquity).is_some());
    }

    #[test]
    fn test_missing_input_is_absent_with_reason() {
        let set = ratios_for(&[(LineItem::Revenue, &[dec!(100)])]);
        assert_eq!(set.get(RatioKind::ReturnOnAssets), None);
        assert_eq!(set.reason(RatioKind::ReturnOnAssets), Some("net_income missing"));
        // every ratio is accounted for, one way or the other
        assert_eq!(set.values.len() + set.unavailable.len(), RatioKind::ALL.len());
    }

    #[test]
    fn test_negative_equity_blocks_equity_ratios() {
        let set = ratios_for(&[
            (LineItem::NetIncome, &[dec!(10)]),
            (LineItem::TotalLiabilities, &[dec!(500)]),
            (LineItem::TotalEquity, &[dec!(-50)]),
        ]);
        assert_eq!(set.reason(RatioKind::ReturnOnEquity), Some("negative equity"));
        assert_eq!(set.reason(RatioKind::DebtToEquity), Some("negative equity"));
    }

    #[test]
    fn test_interest_coverage_sign_tolerant() {
        let set = ratios_for(&[
            (LineItem::OperatingIncome, &[dec!(300)]),
            (LineItem::InterestExpense, &[dec!(-30)]),
        ]);
        assert_eq!(set.get(RatioKind::InterestCoverage), Some(dec!(10)));
    }

    #[test]
    fn test_fcf_margin_and_capex_intensity() {
        let set = ratios_for(&[
            (LineItem::Revenue, &[dec!(1000)]),
            (LineItem::OperatingCashFlow, &[dec!(200)]),
            (LineItem::CapitalExpenditure, &[dec!(-50)]),
        ]);
        assert_eq!(set.get(RatioKind::CapexIntensity), Some(dec!(0.05)));
        assert_eq!(set.get(RatioKind::FcfMargin), Some(dec!(0.15)));
    }

    #[test]
    fn test_effective_tax_rate() {
        let set = ratios_for(&[
            (LineItem::PretaxIncome, &[dec!(200)]),
            (LineItem::IncomeTaxExpense, &[dec!(42)]),
        ]);
        assert_eq!(set.get(RatioKind::EffectiveTaxRate), Some(dec!(0.21)));

        let loss = ratios_for(&[
            (LineItem::PretaxIncome, &[dec!(-200)]),
            (LineItem::IncomeTaxExpense, &[dec!(5)]),
        ]);
        assert_eq!(loss.get(RatioKind::EffectiveTaxRate), None);
    }
}
