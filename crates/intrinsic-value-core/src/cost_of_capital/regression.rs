//! Three-factor regression of excess security returns.
//!
//! Model: r_s - r_f = alpha + b_mkt * (r_m - r_f) + b_smb * SMB + b_hml * HML + e
//!
//! Daily inputs are resampled to a frequency chosen by trading-history
//! length, inner-joined with the factor series on the bucket key, and fitted
//! by OLS through the normal equations. Per-period figures are annualized by
//! compounding, never by multiplication.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, info};

use crate::config::RegressionConfig;
use crate::time_value::annualize_compound;
use crate::types::Rate;

/// Pivots smaller than this are treated as zero when inverting X'X.
const SINGULAR_EPSILON: Decimal = dec!(0.000000000000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A simple (not log) return for the period ending on `date`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatedReturn {
    pub date: NaiveDate,
    pub value: Decimal,
}

/// One row of the factor dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorObservation {
    pub date: NaiveDate,
    /// Market return minus risk-free
    pub market_excess: Decimal,
    pub smb: Decimal,
    pub hml: Decimal,
    pub risk_free: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl SamplingFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            SamplingFrequency::Daily => 252,
            SamplingFrequency::Weekly => 52,
            SamplingFrequency::Monthly => 12,
        }
    }

    /// Coarser sampling for longer histories.
    pub fn for_history(first: NaiveDate, last: NaiveDate, config: &RegressionConfig) -> Self {
        let days = (last - first).num_days().max(0);
        // compare in quarter-days so 365.25-day years stay integral
        let quarter_days = days * 4;
        let year_quarter_days = |years: u32| i64::from(years) * 1461;
        if quarter_days < year_quarter_days(config.daily_below_years) {
            SamplingFrequency::Daily
        } else if quarter_days < year_quarter_days(config.weekly_below_years) {
            SamplingFrequency::Weekly
        } else {
            SamplingFrequency::Monthly
        }
    }

    /// Bucket a date falls into: the day itself, its ISO week, or its month.
    fn bucket(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            SamplingFrequency::Daily => (date.year(), date.ordinal()),
            SamplingFrequency::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            SamplingFrequency::Monthly => (date.year(), date.month()),
        }
    }
}

impl fmt::Display for SamplingFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SamplingFrequency::Daily => "daily",
            SamplingFrequency::Weekly => "weekly",
            SamplingFrequency::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnavailableReason {
    NotRequested,
    EmptyInput,
    NoAlignedPeriods,
    InsufficientSample { observed: usize, required: usize },
    SingularDesign,
    Degenerate { detail: String },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NotRequested => write!(f, "regression not requested"),
            UnavailableReason::EmptyInput => write!(f, "no return series supplied"),
            UnavailableReason::NoAlignedPeriods => {
                write!(f, "security and factor series share no periods")
            }
            UnavailableReason::InsufficientSample { observed, required } => write!(
                f,
                "{observed} aligned observations, at least {required} required"
            ),
            UnavailableReason::SingularDesign => write!(f, "factor design matrix is singular"),
            UnavailableReason::Degenerate { detail } => write!(f, "{detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorLoading {
    pub factor: String,
    pub estimate: Decimal,
    pub std_error: Decimal,
    /// None when the standard error is zero (perfect fit)
    pub t_stat: Option<Decimal>,
    pub p_value: Option<Decimal>,
    /// Compounded annual premium of the factor over the sample
    pub annual_premium: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub alpha: Decimal,
    pub alpha_annualized: Rate,
    pub alpha_t_stat: Option<Decimal>,
    pub alpha_p_value: Option<Decimal>,
    pub market: FactorLoading,
    pub size: FactorLoading,
    pub value: FactorLoading,
    pub r_squared: Decimal,
    pub adjusted_r_squared: Decimal,
    pub residual_std_error: Decimal,
    pub frequency: SamplingFrequency,
    pub sample_size: usize,
    pub annual_risk_free: Rate,
    /// rf + sum(loading * annual premium); alpha excluded
    pub implied_cost_of_equity: Rate,
}

impl RegressionResult {
    pub fn loadings(&self) -> [&FactorLoading; 3] {
        [&self.market, &self.size, &self.value]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RegressionOutcome {
    Available(Box<RegressionResult>),
    Unavailable(UnavailableReason),
}

impl RegressionOutcome {
    pub fn result(&self) -> Option<&RegressionResult> {
        match self {
            RegressionOutcome::Available(r) => Some(r),
            RegressionOutcome::Unavailable(_) => None,
        }
    }
}

/// One resampled period after the join.
#[derive(Debug, Clone, Copy)]
struct AlignedRow {
    excess_return: Decimal,
    market_excess: Decimal,
    smb: Decimal,
    hml: Decimal,
    risk_free: Decimal,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FactorRegressionEngine {
    config: RegressionConfig,
}

impl FactorRegressionEngine {
    pub fn new(config: RegressionConfig) -> Self {
        Self { config }
    }

    pub fn regress(
        &self,
        security_returns: &[DatedReturn],
        factor_returns: &[FactorObservation],
    ) -> RegressionOutcome {
        regress(security_returns, factor_returns, &self.config)
    }
}

/// Fit the three-factor model. Never fails: every problem is an
/// [`RegressionOutcome::Unavailable`] reason.
pub fn regress(
    security_returns: &[DatedReturn],
    factor_returns: &[FactorObservation],
    config: &RegressionConfig,
) -> RegressionOutcome {
    let (Some(first), Some(last)) = (
        security_returns.iter().map(|r| r.date).min(),
        security_returns.iter().map(|r| r.date).max(),
    ) else {
        return RegressionOutcome::Unavailable(UnavailableReason::EmptyInput);
    };
    if factor_returns.is_empty() {
        return RegressionOutcome::Unavailable(UnavailableReason::EmptyInput);
    }

    let frequency = SamplingFrequency::for_history(first, last, config);
    let rows = align(security_returns, factor_returns, frequency);
    debug!(%frequency, aligned = rows.len(), "factor regression sample aligned");

    if rows.is_empty() {
        return RegressionOutcome::Unavailable(UnavailableReason::NoAlignedPeriods);
    }
    if rows.len() < config.min_observations {
        info!(
            observed = rows.len(),
            required = config.min_observations,
            "regression sample too small, cost of equity falls back to CAPM"
        );
        return RegressionOutcome::Unavailable(UnavailableReason::InsufficientSample {
            observed: rows.len(),
            required: config.min_observations,
        });
    }

    match fit(&rows, frequency) {
        Ok(result) => RegressionOutcome::Available(Box::new(result)),
        Err(reason) => RegressionOutcome::Unavailable(reason),
    }
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Compound simple returns into buckets: (1 + r1)(1 + r2)... - 1.
fn compound_by_bucket<I>(items: I, frequency: SamplingFrequency) -> BTreeMap<(i32, u32), Decimal>
where
    I: IntoIterator<Item = (NaiveDate, Decimal)>,
{
    let mut growth: BTreeMap<(i32, u32), Decimal> = BTreeMap::new();
    for (date, r) in items {
        let g = growth.entry(frequency.bucket(date)).or_insert(Decimal::ONE);
        *g *= Decimal::ONE + r;
    }
    growth.into_iter().map(|(k, g)| (k, g - Decimal::ONE)).collect()
}

fn align(
    security_returns: &[DatedReturn],
    factor_returns: &[FactorObservation],
    frequency: SamplingFrequency,
) -> Vec<AlignedRow> {
    let security = compound_by_bucket(security_returns.iter().map(|r| (r.date, r.value)), frequency);
    let field = |f: fn(&FactorObservation) -> Decimal| {
        compound_by_bucket(factor_returns.iter().map(|o| (o.date, f(o))), frequency)
    };
    let market = field(|o| o.market_excess);
    let smb = field(|o| o.smb);
    let hml = field(|o| o.hml);
    let rf = field(|o| o.risk_free);

    security
        .iter()
        .filter_map(|(key, r)| {
            let risk_free = *rf.get(key)?;
            Some(AlignedRow {
                excess_return: *r - risk_free,
                market_excess: *market.get(key)?,
                smb: *smb.get(key)?,
                hml: *hml.get(key)?,
                risk_free,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// OLS
// ---------------------------------------------------------------------------

fn fit(rows: &[AlignedRow], frequency: SamplingFrequency) -> Result<RegressionResult, UnavailableReason> {
    const K: usize = 3;
    let n = rows.len();

    let x: Vec<Vec<Decimal>> = rows
        .iter()
        .map(|r| vec![Decimal::ONE, r.market_excess, r.smb, r.hml])
        .collect();
    let y: Vec<Decimal> = rows.iter().map(|r| r.excess_return).collect();

    let xt = mat_transpose(&x);
    let xtx = mat_multiply(&xt, &x);
    let xtx_inv = mat_inverse(&xtx).ok_or(UnavailableReason::SingularDesign)?;
    let xty = mat_vec_multiply(&xt, &y);
    let beta = mat_vec_multiply(&xtx_inv, &xty);

    let n_dec = Decimal::from(n as i64);
    let y_mean: Decimal = y.iter().sum::<Decimal>() / n_dec;
    let mut ss_res = Decimal::ZERO;
    let mut ss_tot = Decimal::ZERO;
    for (row, yi) in x.iter().zip(&y) {
        let y_hat: Decimal = row.iter().zip(&beta).map(|(a, b)| *a * *b).sum();
        let e = *yi - y_hat;
        ss_res += e * e;
        let d = *yi - y_mean;
        ss_tot += d * d;
    }

    let r_squared = if ss_tot.is_zero() {
        Decimal::ONE
    } else {
        Decimal::ONE - ss_res / ss_tot
    };
    let dof = n as i64 - K as i64 - 1;
    let adjusted_r_squared = if dof <= 0 || ss_tot.is_zero() {
        r_squared
    } else {
        Decimal::ONE
            - (Decimal::ONE - r_squared) * (n_dec - Decimal::ONE) / Decimal::from(dof)
    };
    let sigma_sq = if dof > 0 {
        ss_res / Decimal::from(dof)
    } else {
        Decimal::ZERO
    };

    let ppy = frequency.periods_per_year();
    let annualize = |per_period: Decimal, what: &str| {
        annualize_compound(per_period, ppy).ok_or_else(|| UnavailableReason::Degenerate {
            detail: format!("cannot annualize {what} {per_period} at {ppy} periods/year"),
        })
    };
    let mean = |f: fn(&AlignedRow) -> Decimal| rows.iter().map(f).sum::<Decimal>() / n_dec;

    let coefficient_stats = |j: usize| {
        let se = sqrt_decimal(sigma_sq * xtx_inv[j][j]);
        let t = (!se.is_zero()).then(|| beta[j] / se);
        let p = t.and_then(|t| two_sided_p_value(t, dof));
        (se, t, p)
    };

    let mut loadings = Vec::with_capacity(K);
    let names = ["market", "smb", "hml"];
    let premia = [
        mean(|r| r.market_excess),
        mean(|r| r.smb),
        mean(|r| r.hml),
    ];
    for j in 0..K {
        let (std_error, t_stat, p_value) = coefficient_stats(j + 1);
        loadings.push(FactorLoading {
            factor: names[j].to_string(),
            estimate: beta[j + 1],
            std_error,
            t_stat,
            p_value,
            annual_premium: annualize(premia[j], names[j])?,
        });
    }

    let annual_risk_free = annualize(mean(|r| r.risk_free), "risk-free")?;
    let implied_cost_of_equity = annual_risk_free
        + loadings
            .iter()
            .map(|l| l.estimate * l.annual_premium)
            .sum::<Decimal>();

    let (_, alpha_t_stat, alpha_p_value) = coefficient_stats(0);
    let alpha_annualized = annualize(beta[0], "alpha")?;

    let mut it = loadings.into_iter();
    let (Some(market), Some(size), Some(value)) = (it.next(), it.next(), it.next()) else {
        return Err(UnavailableReason::Degenerate {
            detail: "factor loadings incomplete".into(),
        });
    };

    debug!(
        beta = %market.estimate,
        r_squared = %r_squared,
        implied_cost_of_equity = %implied_cost_of_equity,
        "three-factor regression fitted"
    );

    Ok(RegressionResult {
        alpha: beta[0],
        alpha_annualized,
        alpha_t_stat,
        alpha_p_value,
        market,
        size,
        value,
        r_squared,
        adjusted_r_squared,
        residual_std_error: sqrt_decimal(sigma_sq),
        frequency,
        sample_size: n,
        annual_risk_free,
        implied_cost_of_equity,
    })
}

/// Two-sided Student-t p-value.
fn two_sided_p_value(t: Decimal, dof: i64) -> Option<Decimal> {
    if dof <= 0 {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, dof as f64).ok()?;
    let t = t.abs().to_f64()?;
    let p = 2.0 * (1.0 - dist.cdf(t));
    Decimal::from_f64(p.clamp(0.0, 1.0))
}

// ---------------------------------------------------------------------------
// Matrix helpers (Decimal, small dimensions)
// ---------------------------------------------------------------------------

fn mat_transpose(a: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    if a.is_empty() {
        return Vec::new();
    }
    let m = a.len();
    let n = a[0].len();
    (0..n).map(|j| (0..m).map(|i| a[i][j]).collect()).collect()
}

fn mat_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let p = b.len();
    let n = b.first().map_or(0, Vec::len);
    a.iter()
        .map(|row| {
            (0..n)
                .map(|j| (0..p).map(|l| row[l] * b[l][j]).sum())
                .collect()
        })
        .collect()
}

fn mat_vec_multiply(a: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    a.iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| *a * *b).sum())
        .collect()
}

/// Gauss-Jordan inverse with partial pivoting; None when singular.
#[allow(clippy::needless_range_loop)]
fn mat_inverse(a: &[Vec<Decimal>]) -> Option<Vec<Vec<Decimal>>> {
    let n = a.len();
    let mut aug: Vec<Vec<Decimal>> = (0..n)
        .map(|i| {
            let mut row = Vec::with_capacity(2 * n);
            row.extend_from_slice(&a[i]);
            row.extend((0..n).map(|j| if i == j { Decimal::ONE } else { Decimal::ZERO }));
            row
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by_key(|&row| aug[row][col].abs())?;
        if aug[pivot_row][col].abs() < SINGULAR_EPSILON {
            return None;
        }
        aug.swap(col, pivot_row);

        let pivot = aug[col][col];
        for j in 0..(2 * n) {
            aug[col][j] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.is_zero() {
                continue;
            }
            for j in 0..(2 * n) {
                let update = factor * aug[col][j];
                aug[row][j] -= update;
            }
        }
    }

    Some(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
