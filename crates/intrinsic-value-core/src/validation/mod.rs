//! Layered data-quality gate.
//!
//! Five independent layers inspect the normalized statements and produce
//! severity-tagged [`Finding`]s. An `Error` finding blocks the metric it names,
//! never the whole bundle: [`ValidationReport::blocked_metrics`] feeds
//! [`StatementBundle::without`] to obtain the gated bundle.

mod layers;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{RatioKind, RatioSet};
use crate::config::ValidationConfig;
use crate::market::BenchmarkLookup;
use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLayer {
    Structural,
    Logical,
    RatioBound,
    TimeSeries,
    CrossStatement,
}

impl fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationLayer::Structural => "structural",
            ValidationLayer::Logical => "logical",
            ValidationLayer::RatioBound => "ratio_bound",
            ValidationLayer::TimeSeries => "time_series",
            ValidationLayer::CrossStatement => "cross_statement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Metric {
    Line(LineItem),
    Ratio(RatioKind),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Line(item) => write!(f, "{item}"),
            Metric::Ratio(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub layer: ValidationLayer,
    pub severity: Severity,
    pub message: String,
    /// None for bundle-wide findings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
}

impl Finding {
    pub(crate) fn new(
        layer: ValidationLayer,
        severity: Severity,
        metric: Option<Metric>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            severity,
            message: message.into(),
            metric,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    /// Sector whose ranges drove the ratio-bound layer, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_sector: Option<String>,
}

impl ValidationReport {
    /// Line items carrying at least one error finding.
    pub fn blocked_metrics(&self) -> BTreeSet<LineItem> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .filter_map(|f| match f.metric {
                Some(Metric::Line(item)) => Some(item),
                _ => None,
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    pub fn by_layer(&self, layer: ValidationLayer) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.layer == layer)
    }

    /// Warning and error messages, formatted for an output envelope.
    pub fn messages(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.severity >= Severity::Warning)
            .map(|f| format!("[{}] {}", f.layer, f.message))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run all five layers against `bundle` at `period`.
///
/// `ratios` should be computed on the ungated bundle; the ratio-bound layer
/// uses sector ranges from `benchmark` when available, generic ranges
/// otherwise.
pub fn validate(
    bundle: &StatementBundle,
    period: &ResolvedPeriod,
    ratios: &RatioSet,
    benchmark: &BenchmarkLookup,
    config: &ValidationConfig,
) -> ValidationReport {
    let mut findings = Vec::new();
    findings.extend(layers::structural(bundle, period));
    findings.extend(layers::logical(bundle, period));
    findings.extend(layers::ratio_bound(ratios, benchmark));
    findings.extend(layers::time_series(bundle, period, config));
    findings.extend(layers::cross_statement(bundle, period, config));

    let report = ValidationReport {
        findings,
        benchmark_sector: benchmark.benchmark().map(|b| b.name.clone()),
    };
    debug!(
        symbol = %bundle.symbol,
        findings = report.findings.len(),
        errors = report.by_severity(Severity::Error).count(),
        "validation complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::calculate_ratios;
    use crate::market::BenchmarkDataset;
    use crate::statements::resolve;
    use crate::statements::test_support::bundle_from;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn healthy_rows() -> Vec<(LineItem, Vec<Decimal>)> {
        vec![
            (LineItem::Revenue, vec![dec!(1100), dec!(1000)]),
            (LineItem::OperatingIncome, vec![dec!(165), dec!(150)]),
            (LineItem::NetIncome, vec![dec!(110), dec!(100)]),
            (LineItem::TotalAssets, vec![dec!(2000), dec!(1900)]),
            (LineItem::TotalLiabilities, vec![dec!(1200), dec!(1150)]),
            (LineItem::TotalEquity, vec![dec!(800), dec!(750)]),
            (LineItem::OperatingCashFlow, vec![dec!(200), dec!(180)]),
            (LineItem::CapitalExpenditure, vec![dec!(-80), dec!(-70)]),
        ]
    }

    fn run(rows: &[(LineItem, Vec<Decimal>)], benchmark: &BenchmarkLookup) -> ValidationReport {
        let refs: Vec<(LineItem, &[Decimal])> =
            rows.iter().map(|(i, v)| (*i, v.as_slice())).collect();
        let bundle = bundle_from(2023, &refs);
        let period = resolve(&bundle, 0, None).unwrap();
        let ratios = calculate_ratios(&bundle, &period);
        validate(&bundle, &period, &ratios, benchmark, &ValidationConfig::default())
    }

    fn unavailable() -> BenchmarkLookup {
        BenchmarkLookup::Unavailable("no industry".into())
    }

    fn replace(rows: &mut [(LineItem, Vec<Decimal>)], item: LineItem, values: Vec<Decimal>) {
        if let Some(row) = rows.iter_mut().find(|(i, _)| *i == item) {
            row.1 = values;
        }
    }

    #[test]
    fn test_healthy_bundle_has_no_errors_or_warnings() {
        let report = run(&healthy_rows(), &unavailable());
        assert!(!report.has_errors(), "{:?}", report.findings);
        assert_eq!(report.by_severity(Severity::Warning).count(), 0, "{:?}", report.findings);
        assert!(report.blocked_metrics().is_empty());
    }

    #[test]
    fn test_missing_required_item_is_structural_error() {
        let rows: Vec<_> = healthy_rows()
            .into_iter()
            .filter(|(i, _)| *i != LineItem::OperatingCashFlow)
            .collect();
        let report = run(&rows, &unavailable());
        let structural: Vec<_> = report.by_layer(ValidationLayer::Structural).collect();
        assert_eq!(structural.len(), 1);
        assert_eq!(structural[0].severity, Severity::Error);
        assert_eq!(structural[0].metric, Some(Metric::Line(LineItem::OperatingCashFlow)));
    }

    #[test]
    fn test_negative_assets_block_only_that_metric() {
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::TotalAssets, vec![dec!(-2000), dec!(1900)]);
        let report = run(&rows, &unavailable());
        let blocked = report.blocked_metrics();
        assert!(blocked.contains(&LineItem::TotalAssets));
        assert!(!blocked.contains(&LineItem::Revenue));
        assert!(report
            .by_layer(ValidationLayer::Logical)
            .any(|f| f.severity == Severity::Error));
    }

    #[test]
    fn test_negative_history_is_only_a_warning() {
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::Revenue, vec![dec!(1100), dec!(-5)]);
        let report = run(&rows, &unavailable());
        let logical: Vec<_> = report.by_layer(ValidationLayer::Logical).collect();
        assert_eq!(logical.len(), 1);
        assert_eq!(logical[0].severity, Severity::Warning);
        assert!(report.blocked_metrics().is_empty());
    }

    #[test]
    fn test_ratio_outlier_flagged_not_rejected() {
        // Net margin 80% is outside the generic band
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::NetIncome, vec![dec!(880), dec!(100)]);
        let report = run(&rows, &unavailable());
        let outlier = report
            .by_layer(ValidationLayer::RatioBound)
            .find(|f| f.metric == Some(Metric::Ratio(RatioKind::NetMargin)))
            .expect("net margin outlier");
        assert_eq!(outlier.severity, Severity::Warning);
        assert!(report.blocked_metrics().is_empty());
    }

    #[test]
    fn test_sector_ranges_used_when_available() {
        let utilities = BenchmarkLookup::Available(
            BenchmarkDataset::builtin().get("utilities").cloned().unwrap(),
        );
        // capex intensity of 7.3% sits below the utilities floor of 10%
        let report = run(&healthy_rows(), &utilities);
        assert_eq!(report.benchmark_sector.as_deref(), Some("Utilities"));
        assert!(report
            .by_layer(ValidationLayer::RatioBound)
            .any(|f| f.metric == Some(Metric::Ratio(RatioKind::CapexIntensity))));
    }

    #[test]
    fn test_large_period_change_warned() {
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::NetIncome, vec![dec!(110), dec!(10)]);
        let report = run(&rows, &unavailable());
        let jump = report
            .by_layer(ValidationLayer::TimeSeries)
            .find(|f| f.metric == Some(Metric::Line(LineItem::NetIncome)))
            .expect("net income jump");
        assert_eq!(jump.severity, Severity::Warning);
    }

    #[test]
    fn test_balance_identity_tolerances() {
        // 2000 vs 1200 + 750 = 2.5% gap
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::TotalEquity, vec![dec!(750), dec!(750)]);
        let report = run(&rows, &unavailable());
        let cross: Vec<_> = report.by_layer(ValidationLayer::CrossStatement).collect();
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].severity, Severity::Warning);

        // 2000 vs 1200 + 500 = 15% gap
        replace(&mut rows, LineItem::TotalEquity, vec![dec!(500), dec!(750)]);
        let report = run(&rows, &unavailable());
        let cross: Vec<_> = report.by_layer(ValidationLayer::CrossStatement).collect();
        assert_eq!(cross[0].severity, Severity::Error);
    }

    #[test]
    fn test_gated_bundle_withholds_blocked_items() {
        let mut rows = healthy_rows();
        replace(&mut rows, LineItem::TotalAssets, vec![dec!(-2000), dec!(1900)]);
        let refs: Vec<(LineItem, &[Decimal])> =
            rows.iter().map(|(i, v)| (*i, v.as_slice())).collect();
        let bundle = bundle_from(2023, &refs);
        let period = resolve(&bundle, 0, None).unwrap();
        let ratios = calculate_ratios(&bundle, &period);
        let report = validate(&bundle, &period, &ratios, &unavailable(), &ValidationConfig::default());

        let gated = bundle.without(&report.blocked_metrics());
        assert!(!gated.has(LineItem::TotalAssets));
        assert!(gated.has(LineItem::Revenue));
        let gated_ratios = calculate_ratios(&gated, &period);
        assert!(gated_ratios.get(RatioKind::ReturnOnAssets).is_none());
        assert!(gated_ratios.get(RatioKind::NetMargin).is_some());
    }
}
