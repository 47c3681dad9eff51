use rust_decimal::Decimal;

use super::{Finding, Metric, Severity, ValidationLayer};
use crate::analysis::RatioSet;
use crate::config::ValidationConfig;
use crate::market::BenchmarkLookup;
use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};

/// (a) Required line items present at the resolved period.
pub(super) fn structural(bundle: &StatementBundle, period: &ResolvedPeriod) -> Vec<Finding> {
    let mut findings: Vec<Finding> = LineItem::REQUIRED
        .iter()
        .filter(|item| bundle.value(**item, period.period_end).is_none())
        .map(|item| {
            let message = if bundle.has(*item) {
                format!("{item} has no value for period ending {}", period.period_end)
            } else {
                format!("required line item {item} is missing")
            };
            Finding::new(
                ValidationLayer::Structural,
                Severity::Error,
                Some(Metric::Line(*item)),
                message,
            )
        })
        .collect();

    let optional_missing: Vec<String> = bundle
        .metadata
        .missing
        .iter()
        .filter(|item| !LineItem::REQUIRED.contains(*item))
        .map(|item| item.to_string())
        .collect();
    if !optional_missing.is_empty() {
        findings.push(Finding::new(
            ValidationLayer::Structural,
            Severity::Info,
            None,
            format!("unmatched optional items: {}", optional_missing.join(", ")),
        ));
    }
    findings
}

/// (b) Definitionally non-negative items. Negative at the resolved period
/// blocks the item; negative history only warns.
pub(super) fn logical(bundle: &StatementBundle, period: &ResolvedPeriod) -> Vec<Finding> {
    let mut findings = Vec::new();
    for item in LineItem::NON_NEGATIVE {
        let Some(series) = bundle.series(item) else {
            continue;
        };
        for (date, value) in series.points() {
            if *value >= Decimal::ZERO || *date > period.period_end {
                continue;
            }
            let severity = if *date == period.period_end {
                Severity::Error
            } else {
                Severity::Warning
            };
            findings.push(Finding::new(
                ValidationLayer::Logical,
                severity,
                Some(Metric::Line(item)),
                format!("{item} is negative ({value}) for period ending {date}"),
            ));
        }
    }
    findings
}

/// (c) Ratios outside sector ranges, or the generic band when the sector
/// has none. Outliers are flagged, not rejected.
pub(super) fn ratio_bound(ratios: &RatioSet, benchmark: &BenchmarkLookup) -> Vec<Finding> {
    let sector = benchmark.benchmark();
    ratios
        .values
        .iter()
        .filter_map(|(kind, ratio)| {
            let (min, max, basis) = match sector.and_then(|s| s.range(*kind)) {
                Some(range) => {
                    let basis = sector.map_or("sector", |s| s.name.as_str());
                    (range.min, range.max, basis)
                }
                None => {
                    let (min, max) = kind.generic_range();
                    (min, max, "generic")
                }
            };
            if ratio.value >= min && ratio.value <= max {
                return None;
            }
            Some(Finding::new(
                ValidationLayer::RatioBound,
                Severity::Warning,
                Some(Metric::Ratio(*kind)),
                format!(
                    "{kind} of {} is an outlier against the {basis} range [{min}, {max}]",
                    ratio.value.round_dp(4)
                ),
            ))
        })
        .collect()
}

/// (d) Implausible period-over-period jumps up to the resolved period.
pub(super) fn time_series(
    bundle: &StatementBundle,
    period: &ResolvedPeriod,
    config: &ValidationConfig,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (item, series) in bundle.items() {
        let points: Vec<_> = series
            .points()
            .iter()
            .filter(|(date, _)| *date <= period.period_end)
            .collect();
        for pair in points.windows(2) {
            let (date, current) = *pair[0];
            let (_, previous) = *pair[1];
            if previous.is_zero() {
                continue;
            }
            let change = (current - previous).abs() / previous.abs();
            if change > config.max_period_change {
                findings.push(Finding::new(
                    ValidationLayer::TimeSeries,
                    Severity::Warning,
                    Some(Metric::Line(*item)),
                    format!(
                        "{item} changed {}% into period ending {date} ({previous} to {current})",
                        (change * Decimal::ONE_HUNDRED).round_dp(1)
                    ),
                ));
            }
        }
    }
    findings
}

/// (e) Balance-sheet identity at the resolved period.
pub(super) fn cross_statement(
    bundle: &StatementBundle,
    period: &ResolvedPeriod,
    config: &ValidationConfig,
) -> Vec<Finding> {
    let at = |item| bundle.value(item, period.period_end);
    let (Some(assets), Some(liabilities), Some(equity)) = (
        at(LineItem::TotalAssets),
        at(LineItem::TotalLiabilities),
        at(LineItem::TotalEquity),
    ) else {
        return Vec::new();
    };
    if assets <= Decimal::ZERO {
        return Vec::new();
    }

    let gap = (assets - (liabilities + equity)).abs() / assets;
    let severity = if gap > config.balance_error_tolerance {
        Severity::Error
    } else if gap > config.balance_warning_tolerance {
        Severity::Warning
    } else {
        return Vec::new();
    };
    vec![Finding::new(
        ValidationLayer::CrossStatement,
        severity,
        None,
        format!(
            "assets {assets} differ from liabilities + equity {} by {}%",
            liabilities + equity,
            (gap * Decimal::ONE_HUNDRED).round_dp(2)
        ),
    )]
}
