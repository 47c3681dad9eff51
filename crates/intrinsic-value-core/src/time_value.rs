use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;

use crate::types::{Money, Rate};

/// End-of-period discount factor 1 / (1 + rate)^period.
///
/// Returns `None` when the rate is at or below -100% or the power overflows.
pub fn discount_factor(rate: Rate, period: u32) -> Option<Decimal> {
    let base = Decimal::ONE + rate;
    if base <= Decimal::ZERO {
        return None;
    }
    let growth = base.checked_powi(i64::from(period))?;
    if growth.is_zero() {
        return None;
    }
    Some(Decimal::ONE / growth)
}

/// Present value of cash flows received at the end of periods 1..=n.
pub fn present_value(rate: Rate, cash_flows: &[Money]) -> Option<Money> {
    let mut total = Decimal::ZERO;
    for (idx, cf) in cash_flows.iter().enumerate() {
        let df = discount_factor(rate, idx as u32 + 1)?;
        total = total.checked_add(cf.checked_mul(df)?)?;
    }
    Some(total)
}

/// Compound a per-period rate up to an annual rate: (1 + r)^n - 1.
pub fn annualize_compound(per_period: Rate, periods_per_year: u32) -> Option<Rate> {
    let base = Decimal::ONE + per_period;
    if base <= Decimal::ZERO {
        return None;
    }
    Some(base.checked_powi(i64::from(periods_per_year))? - Decimal::ONE)
}

/// Compound annual growth rate between an oldest and a latest value.
///
/// Undefined (None) when `years` is zero, the base is not positive, or the
/// ratio is not positive: a geometric mean across a sign change has no real
/// value.
pub fn cagr(latest: Money, oldest: Money, years: u32) -> Option<Rate> {
    if years == 0 || oldest <= Decimal::ZERO {
        return None;
    }
    let ratio = latest / oldest;
    if ratio <= Decimal::ZERO {
        return None;
    }
    if years == 1 {
        return Some(ratio - Decimal::ONE);
    }
    let exponent = Decimal::ONE / Decimal::from(years);
    Some(ratio.checked_powd(exponent)? - Decimal::ONE)
}

/// Gordon growth perpetuity value one period after `final_cash_flow`.
///
/// None when the perpetuity does not converge (growth >= discount rate) or
/// the value is not representable.
pub fn gordon_terminal_value(final_cash_flow: Money, growth: Rate, discount: Rate) -> Option<Money> {
    let spread = discount - growth;
    if spread <= Decimal::ZERO {
        return None;
    }
    final_cash_flow
        .checked_mul(Decimal::ONE + growth)?
        .checked_div(spread)
}
