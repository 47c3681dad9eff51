//! Fiscal offset resolution.
//!
//! An offset counts reporting periods back from the most recent one on the
//! bundle's period axis. Nothing downstream interprets offsets: ratios,
//! growth, cost of capital and the DCF base year all take the
//! [`ResolvedPeriod`] produced here.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StatementBundle;
use crate::error::ValuationError;
use crate::CoreResult;

/// Largest gap (days) between an expected and a resolved period end that is
/// still treated as the same period.
pub const DRIFT_TOLERANCE_DAYS: i64 = 14;

/// Period ends within this many days of Jan 1 belong to the prior fiscal year.
const YEAR_BOUNDARY_DAYS: u32 = 7;

/// What the caller believes the resolved period should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedPeriod {
    PeriodEnd(NaiveDate),
    FiscalYear(i32),
}

impl std::fmt::Display for ExpectedPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedPeriod::PeriodEnd(d) => write!(f, "period ending {d}"),
            ExpectedPeriod::FiscalYear(y) => write!(f, "FY{y}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPeriod {
    pub offset: usize,
    pub period_end: NaiveDate,
    /// Index on the bundle period axis (0 = most recent)
    pub position: usize,
    pub fiscal_year: i32,
    /// Signed days between the resolved and the expected period end
    pub drift_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Fiscal-year label of a period end.
///
/// 52/53-week years ending in the first days of January report the prior
/// year's results.
pub fn fiscal_year_label(period_end: NaiveDate) -> i32 {
    if period_end.month() == 1 && period_end.day() <= YEAR_BOUNDARY_DAYS {
        period_end.year() - 1
    } else {
        period_end.year()
    }
}

/// Period axis of one bundle with fiscal labels precomputed.
#[derive(Debug, Clone)]
pub struct FiscalPeriodIndex {
    periods: Vec<NaiveDate>,
    labels: Vec<i32>,
}

impl FiscalPeriodIndex {
    pub fn new(bundle: &StatementBundle) -> Self {
        let periods = bundle.periods().to_vec();
        let labels = periods.iter().map(|d| fiscal_year_label(*d)).collect();
        Self { periods, labels }
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn resolve(
        &self,
        offset: usize,
        expected: Option<ExpectedPeriod>,
    ) -> CoreResult<ResolvedPeriod> {
        let period_end = *self
            .periods
            .get(offset)
            .ok_or(ValuationError::OffsetOutOfRange {
                offset,
                available: self.periods.len(),
            })?;
        let mut resolved = ResolvedPeriod {
            offset,
            period_end,
            position: offset,
            fiscal_year: self.labels[offset],
            drift_days: 0,
            note: None,
        };

        match expected {
            None => {}
            Some(ExpectedPeriod::PeriodEnd(target)) => {
                let drift = (period_end - target).num_days();
                if drift.abs() > DRIFT_TOLERANCE_DAYS {
                    let periods_apart = self.periods_between(offset, target);
                    return Err(mismatch(expected, period_end, periods_apart));
                }
                resolved.drift_days = drift;
                if drift != 0 {
                    resolved.note = Some(format!(
                        "period end {period_end} drifts {drift} day(s) from expected {target}"
                    ));
                }
            }
            Some(ExpectedPeriod::FiscalYear(label)) => {
                if resolved.fiscal_year != label {
                    let periods_apart = match self.labels.iter().position(|l| *l == label) {
                        Some(j) => j as i64 - offset as i64,
                        None => i64::from(resolved.fiscal_year - label),
                    };
                    return Err(mismatch(expected, period_end, periods_apart));
                }
                if period_end.year() != label {
                    resolved.note = Some(format!(
                        "period end {period_end} crosses the year boundary, labelled FY{label}"
                    ));
                }
            }
        }

        debug!(
            offset,
            period_end = %resolved.period_end,
            fiscal_year = resolved.fiscal_year,
            "fiscal period resolved"
        );
        Ok(resolved)
    }

    /// Signed number of periods the resolved position lies after `target`
    /// (positive = resolved is more recent). Never zero: the caller has
    /// already established that the two dates disagree.
    fn periods_between(&self, position: usize, target: NaiveDate) -> i64 {
        let nearest = self
            .periods
            .iter()
            .enumerate()
            .min_by_key(|(_, d)| (**d - target).num_days().abs())
            .map(|(j, d)| (j, (*d - target).num_days().abs()));

        if let Some((j, gap)) = nearest {
            if gap <= DRIFT_TOLERANCE_DAYS && j != position {
                return j as i64 - position as i64;
            }
        }

        let spacing = self.typical_spacing_days();
        let days = (self.periods[position] - target).num_days();
        let estimate = (days as f64 / spacing as f64).round() as i64;
        if estimate == 0 {
            days.signum()
        } else {
            estimate
        }
    }

    fn typical_spacing_days(&self) -> i64 {
        let mut gaps: Vec<i64> = self
            .periods
            .windows(2)
            .map(|w| (w[0] - w[1]).num_days())
            .collect();
        if gaps.is_empty() {
            return 365;
        }
        gaps.sort_unstable();
        gaps[gaps.len() / 2].max(1)
    }
}

/// Resolve `offset` on the bundle's period axis, checking it against the
/// caller's expectation when one is given.
pub fn resolve(
    bundle: &StatementBundle,
    offset: usize,
    expected: Option<ExpectedPeriod>,
) -> CoreResult<ResolvedPeriod> {
    FiscalPeriodIndex::new(bundle).resolve(offset, expected)
}

fn mismatch(
    expected: Option<ExpectedPeriod>,
    resolved: NaiveDate,
    periods_apart: i64,
) -> ValuationError {
    let expected = expected.map(|e| e.to_string()).unwrap_or_default();
    warn!(%expected, %resolved, periods_apart, "fiscal period mismatch");
    ValuationError::FiscalMismatch {
        expected,
        resolved,
        periods_apart,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statements::test_support::{bundle_from, date};
    use crate::statements::{
        BundleMetadata, LineItem, LineSeries, MarketSnapshot, StatementBundle,
    };
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn three_years() -> StatementBundle {
        bundle_from(
            2023,
            &[(LineItem::Revenue, &[dec!(121), dec!(110), dec!(100)])],
        )
    }

    fn retail_calendar() -> StatementBundle {
        // 52/53-week years ending on the Saturday nearest Jan 31 / Dec 31
        let points = vec![
            (date(2024, 1, 3), dec!(3)),
            (date(2022, 12, 28), dec!(2)),
            (date(2021, 12, 29), dec!(1)),
        ];
        let mut items = BTreeMap::new();
        items.insert(LineItem::Revenue, LineSeries::new(points).unwrap());
        StatementBundle::new(
            "RTL",
            "fixture",
            items,
            MarketSnapshot::default(),
            None,
            BundleMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_offset_zero_is_most_recent() {
        let r = resolve(&three_years(), 0, None).unwrap();
        assert_eq!(r.period_end, date(2023, 12, 31));
        assert_eq!(r.position, 0);
        assert_eq!(r.fiscal_year, 2023);
    }

    #[test]
    fn test_offset_counts_back() {
        let r = resolve(&three_years(), 2, None).unwrap();
        assert_eq!(r.period_end, date(2021, 12, 31));
        assert_eq!(r.position, 2);
    }

    #[test]
    fn test_offset_out_of_range() {
        let err = resolve(&three_years(), 3, None).unwrap_err();
        assert!(matches!(
            err,
            ValuationError::OffsetOutOfRange {
                offset: 3,
                available: 3
            }
        ));
    }

    #[test]
    fn test_expected_date_exact() {
        let r = resolve(
            &three_years(),
            1,
            Some(ExpectedPeriod::PeriodEnd(date(2022, 12, 31))),
        )
        .unwrap();
        assert_eq!(r.drift_days, 0);
        assert!(r.note.is_none());
    }

    #[test]
    fn test_expected_date_small_drift_noted() {
        let r = resolve(
            &retail_calendar(),
            1,
            Some(ExpectedPeriod::PeriodEnd(date(2022, 12, 31))),
        )
        .unwrap();
        assert_eq!(r.drift_days, -3);
        assert!(r.note.is_some());
    }

    #[test]
    fn test_expected_date_one_period_off_is_mismatch() {
        let err = resolve(
            &three_years(),
            0,
            Some(ExpectedPeriod::PeriodEnd(date(2022, 12, 31))),
        )
        .unwrap_err();
        match err {
            ValuationError::FiscalMismatch {
                resolved,
                periods_apart,
                ..
            } => {
                assert_eq!(resolved, date(2023, 12, 31));
                assert_eq!(periods_apart, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_expected_date_off_axis_estimates_distance() {
        let err = resolve(
            &three_years(),
            0,
            Some(ExpectedPeriod::PeriodEnd(date(2020, 12, 31))),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValuationError::FiscalMismatch {
                periods_apart: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_fiscal_year_label_boundary() {
        assert_eq!(fiscal_year_label(date(2024, 1, 3)), 2023);
        assert_eq!(fiscal_year_label(date(2024, 1, 7)), 2023);
        assert_eq!(fiscal_year_label(date(2024, 1, 8)), 2024);
        assert_eq!(fiscal_year_label(date(2024, 2, 3)), 2024);
        assert_eq!(fiscal_year_label(date(2023, 9, 30)), 2023);
    }

    #[test]
    fn test_expected_label_across_year_boundary() {
        let r = resolve(&retail_calendar(), 0, Some(ExpectedPeriod::FiscalYear(2023))).unwrap();
        assert_eq!(r.period_end, date(2024, 1, 3));
        assert_eq!(r.fiscal_year, 2023);
        assert!(r.note.is_some());
    }

    #[test]
    fn test_expected_label_mismatch_counts_periods() {
        let err = resolve(&three_years(), 0, Some(ExpectedPeriod::FiscalYear(2021))).unwrap_err();
        assert!(matches!(
            err,
            ValuationError::FiscalMismatch {
                periods_apart: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_expected_label_not_on_axis() {
        let err = resolve(&three_years(), 0, Some(ExpectedPeriod::FiscalYear(2025))).unwrap_err();
        assert!(matches!(
            err,
            ValuationError::FiscalMismatch {
                periods_apart: -2,
                ..
            }
        ));
    }
}
