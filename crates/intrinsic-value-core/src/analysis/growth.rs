//! Growth rates over a lookback window ending at the resolved period.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};
use crate::time_value::cagr;
use crate::types::{Money, Rate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthMetric {
    Revenue,
    NetIncome,
    OperatingIncome,
    OperatingCashFlow,
    TotalAssets,
    FreeCashFlow,
}

impl GrowthMetric {
    pub const ALL: [GrowthMetric; 6] = [
        GrowthMetric::Revenue,
        GrowthMetric::NetIncome,
        GrowthMetric::OperatingIncome,
        GrowthMetric::OperatingCashFlow,
        GrowthMetric::TotalAssets,
        GrowthMetric::FreeCashFlow,
    ];

    /// Line item backing the metric; simple FCF is derived from two.
    fn line_item(&self) -> Option<LineItem> {
        match self {
            GrowthMetric::Revenue => Some(LineItem::Revenue),
            GrowthMetric::NetIncome => Some(LineItem::NetIncome),
            GrowthMetric::OperatingIncome => Some(LineItem::OperatingIncome),
            GrowthMetric::OperatingCashFlow => Some(LineItem::OperatingCashFlow),
            GrowthMetric::TotalAssets => Some(LineItem::TotalAssets),
            GrowthMetric::FreeCashFlow => None,
        }
    }
}

impl fmt::Display for GrowthMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrowthMetric::Revenue => "revenue",
            GrowthMetric::NetIncome => "net_income",
            GrowthMetric::OperatingIncome => "operating_income",
            GrowthMetric::OperatingCashFlow => "operating_cash_flow",
            GrowthMetric::TotalAssets => "total_assets",
            GrowthMetric::FreeCashFlow => "free_cash_flow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthEntry {
    /// None when the base is not positive or the ratio changes sign
    pub cagr: Option<Rate>,
    pub absolute_change: Money,
    /// None when the oldest value is zero
    pub percent_change: Option<Rate>,
    /// Change from the previous period only
    pub period_change: Option<Rate>,
    pub latest: Money,
    pub oldest: Money,
    pub latest_date: NaiveDate,
    pub oldest_date: NaiveDate,
    /// Periods spanned between oldest and latest
    pub years: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthSet {
    pub lookback: usize,
    pub metrics: BTreeMap<GrowthMetric, GrowthEntry>,
    pub unavailable: BTreeMap<GrowthMetric, String>,
}

impl GrowthSet {
    pub fn get(&self, metric: GrowthMetric) -> Option<&GrowthEntry> {
        self.metrics.get(&metric)
    }

    pub fn cagr(&self, metric: GrowthMetric) -> Option<Rate> {
        self.metrics.get(&metric).and_then(|e| e.cagr)
    }
}

/// Values of `metric` over the window, positioned on the bundle axis and
/// ordered most recent first.
fn window(
    bundle: &StatementBundle,
    metric: GrowthMetric,
    period: &ResolvedPeriod,
    lookback: usize,
) -> Vec<(usize, NaiveDate, Decimal)> {
    bundle
        .periods()
        .iter()
        .enumerate()
        .skip(period.position)
        .take(lookback)
        .filter_map(|(pos, date)| {
            let value = match metric.line_item() {
                Some(item) => bundle.value(item, *date)?,
                None => {
                    let ocf = bundle.value(LineItem::OperatingCashFlow, *date)?;
                    let capex = bundle.value(LineItem::CapitalExpenditure, *date)?;
                    ocf - capex.abs()
                }
            };
            Some((pos, *date, value))
        })
        .collect()
}

fn growth_entry(points: &[(usize, NaiveDate, Decimal)]) -> Result<GrowthEntry, String> {
    let (latest_pos, latest_date, latest) = *points
        .first()
        .ok_or_else(|| "no value at resolved period".to_string())?;
    let (oldest_pos, oldest_date, oldest) = *points
        .last()
        .ok_or_else(|| "no value at resolved period".to_string())?;
    if points.len() < 2 {
        return Err("fewer than 2 periods".into());
    }

    let years = (oldest_pos - latest_pos) as u32;
    let growth = cagr(latest, oldest, years);
    let note = growth.is_none().then(|| {
        if oldest <= Decimal::ZERO {
            format!("CAGR undefined: base value {oldest} is not positive")
        } else {
            "CAGR undefined: value changed sign".to_string()
        }
    });

    let percent_change = (!oldest.is_zero()).then(|| (latest - oldest) / oldest.abs());

    let period_change = match points.get(1) {
        Some((pos, _, prev)) if *pos == latest_pos + 1 && !prev.is_zero() => {
            Some((latest - prev) / prev.abs())
        }
        _ => None,
    };

    Ok(GrowthEntry {
        cagr: growth,
        absolute_change: latest - oldest,
        percent_change,
        period_change,
        latest,
        oldest,
        latest_date,
        oldest_date,
        years,
        note,
    })
}

/// Growth of each tracked metric over `lookback` periods counted back from
/// (and including) `period`. Never fails.
pub fn calculate_growth(
    bundle: &StatementBundle,
    period: &ResolvedPeriod,
    lookback: usize,
) -> GrowthSet {
    let mut set = GrowthSet {
        lookback,
        ..GrowthSet::default()
    };
    for metric in GrowthMetric::ALL {
        let points = window(bundle, metric, period, lookback);
        // the window must start at the resolved period itself
        let anchored = points.first().is_some_and(|(pos, _, _)| *pos == period.position);
        let outcome = if anchored {
            growth_entry(&points)
        } else {
            Err("no value at resolved period".into())
        };
        match outcome {
            Ok(entry) => {
                set.metrics.insert(metric, entry);
            }
            Err(reason) => {
                set.unavailable.insert(metric, reason);
            }
        }
    }
    set
}
