//! Historical drivers feeding the DCF projection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analysis::{GrowthEntry, GrowthMetric, GrowthSet};
use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};
use crate::types::{Money, Rate, Sourced};

/// Base-year figures and ratios, each tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcfDrivers {
    /// None when the gated bundle has no revenue at the resolved period
    pub base_revenue: Option<Money>,
    pub revenue_growth: Sourced<Rate>,
    /// None when neither operating nor net income is available
    pub ebit_margin: Option<Sourced<Rate>>,
    pub tax_rate: Rate,
    pub da_pct_revenue: Sourced<Rate>,
    pub capex_pct_revenue: Sourced<Rate>,
    /// Working-capital investment per unit of revenue change
    pub wc_pct_revenue_change: Sourced<Rate>,
    pub net_debt: Sourced<Money>,
    pub diluted_shares: Option<Decimal>,
}

impl DcfDrivers {
    /// Read drivers from the gated bundle at `period`.
    ///
    /// `tax_rate` comes from the WACC breakdown; `fallback_growth` (the base
    /// terminal growth) is the last resort for revenue growth.
    pub fn from_statements(
        bundle: &StatementBundle,
        period: &ResolvedPeriod,
        growth: &GrowthSet,
        tax_rate: Rate,
        fallback_growth: Rate,
    ) -> Self {
        let at = |item: LineItem| bundle.value(item, period.period_end);
        let revenue = at(LineItem::Revenue).filter(|r| *r > Decimal::ZERO);
        let share_of_revenue = |value: Option<Decimal>| Some(value?.abs() / revenue?);

        let revenue_growth = match growth.get(GrowthMetric::Revenue) {
            Some(GrowthEntry { cagr: Some(g), .. }) => Sourced::computed(*g),
            Some(GrowthEntry {
                period_change: Some(g),
                ..
            }) => Sourced::fallback(*g, "latest period-over-period change (CAGR undefined)"),
            _ => Sourced::fallback(fallback_growth, "base terminal growth (no revenue history)"),
        };

        let ebit_margin = match (at(LineItem::OperatingIncome), revenue) {
            (Some(ebit), Some(r)) => Some(Sourced::computed(ebit / r)),
            _ => at(LineItem::NetIncome)
                .zip(revenue)
                .map(|(ni, r)| Sourced::fallback(ni / r, "net margin (operating income missing)")),
        };

        let da_pct_revenue = share_of_revenue(at(LineItem::DepreciationAmortization))
            .map(Sourced::computed)
            .unwrap_or_else(|| Sourced::unavailable(Decimal::ZERO, "D&A unavailable, assumed 0"));
        let capex_pct_revenue = share_of_revenue(at(LineItem::CapitalExpenditure))
            .map(Sourced::computed)
            .unwrap_or_else(|| Sourced::unavailable(Decimal::ZERO, "capex unavailable, assumed 0"));

        let wc_pct_revenue_change = working_capital_intensity(bundle, period)
            .map(Sourced::computed)
            .unwrap_or_else(|| {
                Sourced::unavailable(
                    Decimal::ZERO,
                    "working-capital intensity unavailable, assumed 0",
                )
            });

        let net_debt = match (at(LineItem::TotalDebt), at(LineItem::CashAndEquivalents)) {
            (Some(debt), Some(cash)) => Sourced::computed(debt - cash),
            (Some(debt), None) => Sourced::fallback(debt, "cash unavailable, net debt = total debt"),
            (None, Some(cash)) => Sourced::fallback(-cash, "total debt unavailable, assumed 0"),
            (None, None) => Sourced::unavailable(Decimal::ZERO, "debt and cash unavailable, assumed 0"),
        };

        let diluted_shares = bundle
            .market
            .diluted_shares
            .or_else(|| at(LineItem::DilutedShares))
            .filter(|s| *s > Decimal::ZERO);

        Self {
            base_revenue: at(LineItem::Revenue),
            revenue_growth,
            ebit_margin,
            tax_rate,
            da_pct_revenue,
            capex_pct_revenue,
            wc_pct_revenue_change,
            net_debt,
            diluted_shares,
        }
    }
}

/// Working-capital investment over the last revenue change. Cash-flow
/// statements report the change as a cash effect, so investment is its
/// negation.
fn working_capital_intensity(bundle: &StatementBundle, period: &ResolvedPeriod) -> Option<Rate> {
    let change = bundle.value(LineItem::ChangeInWorkingCapital, period.period_end)?;
    let current = bundle.value_at(LineItem::Revenue, period.position)?;
    let previous = bundle.value_at(LineItem::Revenue, period.position + 1)?;
    let revenue_change = current - previous;
    if revenue_change.is_zero() {
        return None;
    }
    Some(-change / revenue_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::calculate_growth;
    use crate::statements::resolve;
    use crate::statements::test_support::bundle_from;
    use rust_decimal_macros::dec;

    fn drivers(rows: &[(LineItem, &[Decimal])]) -> DcfDrivers {
        let bundle = bundle_from(2023, rows);
        let period = resolve(&bundle, 0, None).unwrap();
        let growth = calculate_growth(&bundle, &period, 5);
        DcfDrivers::from_statements(&bundle, &period, &growth, dec!(0.21), dec!(0.025))
    }

    #[test]
    fn test_full_drivers_computed() {
        let d = drivers(&[
            (LineItem::Revenue, &[dec!(121), dec!(110), dec!(100)]),
            (LineItem::OperatingIncome, &[dec!(24.2)]),
            (LineItem::DepreciationAmortization, &[dec!(6.05)]),
            (LineItem::CapitalExpenditure, &[dec!(-12.1)]),
            (LineItem::ChangeInWorkingCapital, &[dec!(-2.2)]),
            (LineItem::TotalDebt, &[dec!(50)]),
            (LineItem::CashAndEquivalents, &[dec!(20)]),
            (LineItem::DilutedShares, &[dec!(10)]),
        ]);
        assert_eq!(d.base_revenue, Some(dec!(121)));
        assert!((d.revenue_growth.value - dec!(0.10)).abs() < dec!(0.000001));
        assert!(!d.revenue_growth.provenance.is_fallback());
        assert_eq!(d.ebit_margin.unwrap().value, dec!(0.2));
        assert_eq!(d.da_pct_revenue.value, dec!(0.05));
        assert_eq!(d.capex_pct_revenue.value, dec!(0.1));
        // 2.2 invested on 11 of revenue growth
        assert_eq!(d.wc_pct_revenue_change.value, dec!(0.2));
        assert_eq!(d.net_debt.value, dec!(30));
        assert_eq!(d.diluted_shares, Some(dec!(10)));
    }

    #[test]
    fn test_growth_falls_back_to_period_change_then_terminal() {
        // negative base: CAGR undefined, period change defined
        let d = drivers(&[(LineItem::Revenue, &[dec!(50), dec!(40), dec!(-10)])]);
        assert!(d.revenue_growth.provenance.is_fallback());
        assert_eq!(d.revenue_growth.value, dec!(0.25));

        let d = drivers(&[(LineItem::Revenue, &[dec!(50)])]);
        assert_eq!(d.revenue_growth.value, dec!(0.025));
        assert!(d.revenue_growth.provenance.is_fallback());
    }

    #[test]
    fn test_missing_inputs_are_annotated() {
        let d = drivers(&[
            (LineItem::Revenue, &[dec!(100)]),
            (LineItem::NetIncome, &[dec!(8)]),
        ]);
        let margin = d.ebit_margin.unwrap();
        assert_eq!(margin.value, dec!(0.08));
        assert!(margin.provenance.is_fallback());
        assert!(d.da_pct_revenue.provenance.is_unavailable());
        assert!(d.capex_pct_revenue.provenance.is_unavailable());
        assert!(d.net_debt.provenance.is_unavailable());
        assert_eq!(d.net_debt.value, Decimal::ZERO);
        assert_eq!(d.diluted_shares, None);
    }
}
