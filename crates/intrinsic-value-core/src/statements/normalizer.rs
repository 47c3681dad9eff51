//! Provider tables → canonical [`StatementBundle`].
//!
//! Providers differ in two ways: the names they give line items and whether
//! periods run along rows or columns. Both are handled as data: a
//! [`NameMapping`] of canonical item → candidate labels, and an orientation
//! check on the label axes.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BundleMetadata, LineItem, LineSeries, MarketSnapshot, StatementBundle};
use crate::error::ValuationError;
use crate::CoreResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One provider table as fetched: labels on both axes and a cell grid
/// indexed `cells[row][column]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTable {
    /// Statement name for diagnostics ("income", "balance", "cash_flow")
    pub statement: String,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub cells: Vec<Vec<Option<Decimal>>>,
}

/// Everything the acquisition layer hands over for one security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStatementBundle {
    pub symbol: String,
    pub provider: String,
    pub tables: Vec<RawTable>,
    #[serde(default)]
    pub market: MarketSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry_code: Option<String>,
}

/// Canonical item → ordered candidate labels.
#[derive(Debug, Clone)]
pub struct NameMapping {
    candidates: BTreeMap<LineItem, Vec<String>>,
}

impl Default for NameMapping {
    fn default() -> Self {
        let candidates = LineItem::ALL
            .iter()
            .map(|item| {
                let names = item.candidates().iter().map(|s| s.to_string()).collect();
                (*item, names)
            })
            .collect();
        Self { candidates }
    }
}

impl NameMapping {
    /// Add provider-specific labels ahead of the defaults for `item`.
    pub fn with_candidates(mut self, item: LineItem, labels: &[&str]) -> Self {
        let entry = self.candidates.entry(item).or_default();
        let mut merged: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        merged.append(entry);
        *entry = merged;
        self
    }

    pub fn candidates(&self, item: LineItem) -> &[String] {
        self.candidates.get(&item).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_known_label(&self, normalized: &str) -> bool {
        self.candidates
            .values()
            .flatten()
            .any(|c| normalize_label(c) == normalized)
    }
}

/// A table with periods on the column axis.
struct OrientedTable {
    dates: Vec<Option<NaiveDate>>,
    rows: Vec<(String, Vec<Option<Decimal>>)>,
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StatementNormalizer {
    mapping: NameMapping,
}

impl StatementNormalizer {
    pub fn new(mapping: NameMapping) -> Self {
        Self { mapping }
    }

    /// Normalize a raw provider bundle.
    ///
    /// Unmatched items are omitted and listed in `metadata.missing`; they are
    /// never filled with zero. No tables at all is `DataUnavailable`; tables
    /// that yield no canonical periods are `InsufficientData`.
    pub fn normalize(&self, raw: &RawStatementBundle) -> CoreResult<StatementBundle> {
        if raw.tables.is_empty() {
            return Err(ValuationError::DataUnavailable(format!(
                "provider {} returned no statements for {}",
                raw.provider, raw.symbol
            )));
        }

        // normalized label -> (provider label, dated values); first table wins
        let mut labelled: HashMap<String, (String, Vec<(NaiveDate, Decimal)>)> = HashMap::new();
        for table in &raw.tables {
            let oriented = self.orient(table)?;
            for (label, values) in oriented.rows {
                let key = normalize_label(&label);
                if labelled.contains_key(&key) {
                    debug!(label = %label, statement = %table.statement, "duplicate label ignored");
                    continue;
                }
                let points: Vec<(NaiveDate, Decimal)> = oriented
                    .dates
                    .iter()
                    .zip(values)
                    .filter_map(|(d, v)| Some(((*d)?, v?)))
                    .collect();
                labelled.insert(key, (label, points));
            }
        }

        let mut items = BTreeMap::new();
        let mut metadata = BundleMetadata::default();
        for item in LineItem::ALL {
            let found = self.mapping.candidates(item).iter().find_map(|candidate| {
                labelled
                    .get(&normalize_label(candidate))
                    .filter(|(_, points)| !points.is_empty())
            });
            match found {
                Some((label, points)) => {
                    items.insert(item, build_series(item, points)?);
                    metadata.matched_from.insert(item, label.clone());
                }
                None => {
                    metadata.missing.insert(item);
                }
            }
        }

        derive_total_debt(&mut items, &mut metadata)?;

        let required_missing: Vec<&str> = LineItem::REQUIRED
            .iter()
            .filter(|i| metadata.missing.contains(*i))
            .map(LineItem::name)
            .collect();
        if !required_missing.is_empty() {
            warn!(
                symbol = %raw.symbol,
                provider = %raw.provider,
                missing = ?required_missing,
                "required line items unmatched"
            );
        }

        StatementBundle::new(
            raw.symbol.clone(),
            raw.provider.clone(),
            items,
            raw.market.clone(),
            raw.industry_code.clone(),
            metadata,
        )
    }

    /// Put periods on the column axis, transposing when the provider lays
    /// them out on rows.
    fn orient(&self, table: &RawTable) -> CoreResult<OrientedTable> {
        check_shape(table)?;

        let row_dates: Vec<Option<NaiveDate>> =
            table.row_labels.iter().map(|l| parse_period_label(l)).collect();
        let col_dates: Vec<Option<NaiveDate>> = table
            .column_labels
            .iter()
            .map(|l| parse_period_label(l))
            .collect();
        let rows_are_dates = mostly_dates(&row_dates);
        let cols_are_dates = mostly_dates(&col_dates);
        let rows_are_metrics = table
            .row_labels
            .iter()
            .any(|l| self.mapping.is_known_label(&normalize_label(l)));

        if rows_are_dates && !rows_are_metrics {
            debug!(statement = %table.statement, "periods on rows, transposing");
            let width = table.column_labels.len();
            let rows = (0..width)
                .map(|j| {
                    let values = table.cells.iter().map(|row| row[j]).collect();
                    (table.column_labels[j].clone(), values)
                })
                .collect();
            return Ok(OrientedTable {
                dates: row_dates,
                rows,
            });
        }

        if cols_are_dates {
            let rows = table
                .row_labels
                .iter()
                .cloned()
                .zip(table.cells.iter().cloned())
                .collect();
            return Ok(OrientedTable {
                dates: col_dates,
                rows,
            });
        }

        Err(ValuationError::InvalidInput {
            field: format!("table:{}", table.statement),
            reason: "neither axis holds period-end dates".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_shape(table: &RawTable) -> CoreResult<()> {
    if table.cells.len() != table.row_labels.len() {
        return Err(ValuationError::InvalidInput {
            field: format!("table:{}", table.statement),
            reason: format!(
                "{} row labels but {} cell rows",
                table.row_labels.len(),
                table.cells.len()
            ),
        });
    }
    let width = table.column_labels.len();
    if let Some(idx) = table.cells.iter().position(|row| row.len() != width) {
        return Err(ValuationError::InvalidInput {
            field: format!("table:{}", table.statement),
            reason: format!("row {idx} has {} cells, expected {width}", table.cells[idx].len()),
        });
    }
    Ok(())
}

fn mostly_dates(parsed: &[Option<NaiveDate>]) -> bool {
    let hits = parsed.iter().filter(|d| d.is_some()).count();
    hits > 0 && hits * 2 >= parsed.len()
}

fn build_series(item: LineItem, points: &[(NaiveDate, Decimal)]) -> CoreResult<LineSeries> {
    let mut sorted = points.to_vec();
    // stable sort keeps the provider's first value for a repeated date
    sorted.sort_by(|a, b| b.0.cmp(&a.0));
    let before = sorted.len();
    sorted.dedup_by(|later, earlier| later.0 == earlier.0);
    if sorted.len() != before {
        debug!(item = %item, dropped = before - sorted.len(), "duplicate period dates dropped");
    }
    LineSeries::new(sorted)
}

/// TotalDebt = LongTermDebt + ShortTermDebt when the provider reports only
/// the components.
fn derive_total_debt(
    items: &mut BTreeMap<LineItem, LineSeries>,
    metadata: &mut BundleMetadata,
) -> CoreResult<()> {
    if items.contains_key(&LineItem::TotalDebt) {
        return Ok(());
    }
    let long = items.get(&LineItem::LongTermDebt);
    let short = items.get(&LineItem::ShortTermDebt);
    if long.is_none() && short.is_none() {
        return Ok(());
    }
    let dates: BTreeSet<NaiveDate> = long
        .into_iter()
        .chain(short)
        .flat_map(|s| s.points().iter().map(|(d, _)| *d))
        .collect();
    let points: Vec<(NaiveDate, Decimal)> = dates
        .into_iter()
        .rev()
        .map(|d| {
            let l = long.and_then(|s| s.get(d)).unwrap_or(Decimal::ZERO);
            let s = short.and_then(|s| s.get(d)).unwrap_or(Decimal::ZERO);
            (d, l + s)
        })
        .collect();
    items.insert(LineItem::TotalDebt, LineSeries::new(points)?);
    metadata.missing.remove(&LineItem::TotalDebt);
    metadata
        .matched_from
        .insert(LineItem::TotalDebt, "derived:long_term_debt+short_term_debt".into());
    Ok(())
}

/// Canonical form of a provider label: lowercase words, `&` spelled out,
/// camelCase split, punctuation dropped, plurals (`-s`, `-ies`) singularized.
pub fn normalize_label(label: &str) -> String {
    let mut spaced = String::with_capacity(label.len() + 8);
    let mut prev: Option<char> = None;
    for ch in label.trim().chars() {
        if ch.is_uppercase() && prev.is_some_and(|p| p.is_lowercase()) {
            spaced.push(' ');
        }
        if ch == '&' {
            spaced.push_str(" and ");
        } else if ch.is_alphanumeric() {
            spaced.extend(ch.to_lowercase());
        } else {
            spaced.push(' ');
        }
        prev = Some(ch);
    }
    spaced
        .split_whitespace()
        .map(singularize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn singularize(word: &str) -> Cow<'_, str> {
    if word.len() > 4 && word.ends_with("ies") {
        Cow::Owned(format!("{}y", &word[..word.len() - 3]))
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        Cow::Borrowed(&word[..word.len() - 1])
    } else {
        Cow::Borrowed(word)
    }
}

/// Parse a period label: `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY`, an ISO
/// datetime, or a bare fiscal year (mapped to Dec 31).
pub fn parse_period_label(label: &str) -> Option<NaiveDate> {
    let s = label.trim();
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, fmt) {
            return Some(d);
        }
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = s.parse().ok()?;
        if (1900..=2200).contains(&year) {
            return NaiveDate::from_ymd_opt(year, 12, 31);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
