//! Canonical financial statements.
//!
//! Provider tables are normalized into a [`StatementBundle`]: canonical line
//! items keyed by [`LineItem`], each a most-recent-first series of
//! (period-end, value) pairs sharing one period axis.

pub mod fiscal;
pub mod normalizer;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::Money;
use crate::CoreResult;

pub use fiscal::{resolve, ExpectedPeriod, ResolvedPeriod};
pub use normalizer::{NameMapping, RawStatementBundle, RawTable, StatementNormalizer};

// ---------------------------------------------------------------------------
// Line items
// ---------------------------------------------------------------------------

/// Canonical statement line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItem {
    Revenue,
    CostOfRevenue,
    GrossProfit,
    OperatingIncome,
    DepreciationAmortization,
    InterestExpense,
    PretaxIncome,
    IncomeTaxExpense,
    NetIncome,
    TotalAssets,
    CurrentAssets,
    CashAndEquivalents,
    TotalLiabilities,
    CurrentLiabilities,
    TotalEquity,
    TotalDebt,
    LongTermDebt,
    ShortTermDebt,
    OperatingCashFlow,
    CapitalExpenditure,
    ChangeInWorkingCapital,
    NetBorrowing,
    DilutedShares,
}

impl LineItem {
    pub const ALL: [LineItem; 23] = [
        LineItem::Revenue,
        LineItem::CostOfRevenue,
        LineItem::GrossProfit,
        LineItem::OperatingIncome,
        LineItem::DepreciationAmortization,
        LineItem::InterestExpense,
        LineItem::PretaxIncome,
        LineItem::IncomeTaxExpense,
        LineItem::NetIncome,
        LineItem::TotalAssets,
        LineItem::CurrentAssets,
        LineItem::CashAndEquivalents,
        LineItem::TotalLiabilities,
        LineItem::CurrentLiabilities,
        LineItem::TotalEquity,
        LineItem::TotalDebt,
        LineItem::LongTermDebt,
        LineItem::ShortTermDebt,
        LineItem::OperatingCashFlow,
        LineItem::CapitalExpenditure,
        LineItem::ChangeInWorkingCapital,
        LineItem::NetBorrowing,
        LineItem::DilutedShares,
    ];

    /// Items without which ratios, free cash flow and the DCF base year
    /// cannot be built.
    pub const REQUIRED: [LineItem; 7] = [
        LineItem::Revenue,
        LineItem::NetIncome,
        LineItem::TotalAssets,
        LineItem::TotalLiabilities,
        LineItem::TotalEquity,
        LineItem::OperatingCashFlow,
        LineItem::CapitalExpenditure,
    ];

    /// Items that can never legitimately be negative.
    pub const NON_NEGATIVE: [LineItem; 7] = [
        LineItem::Revenue,
        LineItem::TotalAssets,
        LineItem::TotalLiabilities,
        LineItem::CurrentAssets,
        LineItem::CashAndEquivalents,
        LineItem::TotalDebt,
        LineItem::DilutedShares,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LineItem::Revenue => "revenue",
            LineItem::CostOfRevenue => "cost_of_revenue",
            LineItem::GrossProfit => "gross_profit",
            LineItem::OperatingIncome => "operating_income",
            LineItem::DepreciationAmortization => "depreciation_amortization",
            LineItem::InterestExpense => "interest_expense",
            LineItem::PretaxIncome => "pretax_income",
            LineItem::IncomeTaxExpense => "income_tax_expense",
            LineItem::NetIncome => "net_income",
            LineItem::TotalAssets => "total_assets",
            LineItem::CurrentAssets => "current_assets",
            LineItem::CashAndEquivalents => "cash_and_equivalents",
            LineItem::TotalLiabilities => "total_liabilities",
            LineItem::CurrentLiabilities => "current_liabilities",
            LineItem::TotalEquity => "total_equity",
            LineItem::TotalDebt => "total_debt",
            LineItem::LongTermDebt => "long_term_debt",
            LineItem::ShortTermDebt => "short_term_debt",
            LineItem::OperatingCashFlow => "operating_cash_flow",
            LineItem::CapitalExpenditure => "capital_expenditure",
            LineItem::ChangeInWorkingCapital => "change_in_working_capital",
            LineItem::NetBorrowing => "net_borrowing",
            LineItem::DilutedShares => "diluted_shares",
        }
    }

    /// Provider labels tried in order; the first one present wins.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            LineItem::Revenue => &[
                "Total Revenue",
                "Revenue",
                "Revenues",
                "Net Sales",
                "Total Net Sales",
                "Sales",
                "Operating Revenue",
                "Revenue From Contract With Customer Excluding Assessed Tax",
            ],
            LineItem::CostOfRevenue => &[
                "Cost Of Revenue",
                "Cost of Goods Sold",
                "Cost of Sales",
                "Cost of Goods and Services Sold",
                "Reconciled Cost Of Revenue",
            ],
            LineItem::GrossProfit => &["Gross Profit"],
            LineItem::OperatingIncome => &[
                "Operating Income",
                "EBIT",
                "Operating Income Loss",
                "Income From Operations",
                "Total Operating Income As Reported",
            ],
            LineItem::DepreciationAmortization => &[
                "Depreciation And Amortization",
                "Depreciation Amortization Depletion",
                "Depreciation, Depletion and Amortization",
                "Reconciled Depreciation",
                "Depreciation",
            ],
            LineItem::InterestExpense => &[
                "Interest Expense",
                "Interest Expense Non Operating",
                "Interest Paid",
            ],
            LineItem::PretaxIncome => &[
                "Pretax Income",
                "Income Before Tax",
                "Income Before Income Taxes",
                "Earnings Before Tax",
            ],
            LineItem::IncomeTaxExpense => &[
                "Tax Provision",
                "Income Tax Expense",
                "Provision For Income Taxes",
                "Income Taxes",
            ],
            LineItem::NetIncome => &[
                "Net Income",
                "Net Income Common Stockholders",
                "Net Earnings",
                "Net Income Loss",
                "Profit Loss",
            ],
            LineItem::TotalAssets => &["Total Assets", "Assets"],
            LineItem::CurrentAssets => &["Total Current Assets", "Current Assets", "Assets Current"],
            LineItem::CashAndEquivalents => &[
                "Cash And Cash Equivalents",
                "Cash and Equivalents",
                "Cash",
                "Cash Cash Equivalents And Short Term Investments",
            ],
            LineItem::TotalLiabilities => &[
                "Total Liabilities",
                "Total Liabilities Net Minority Interest",
                "Liabilities",
            ],
            LineItem::CurrentLiabilities => &[
                "Total Current Liabilities",
                "Current Liabilities",
                "Liabilities Current",
            ],
            LineItem::TotalEquity => &[
                "Total Stockholder Equity",
                "Stockholders Equity",
                "Total Equity",
                "Total Shareholder Equity",
                "Shareholders Equity",
                "Total Equity Gross Minority Interest",
                "Common Stock Equity",
            ],
            LineItem::TotalDebt => &["Total Debt"],
            LineItem::LongTermDebt => &["Long Term Debt", "Long Term Debt Noncurrent"],
            LineItem::ShortTermDebt => &[
                "Short Term Debt",
                "Current Debt",
                "Short Long Term Debt",
                "Current Portion Of Long Term Debt",
            ],
            LineItem::OperatingCashFlow => &[
                "Operating Cash Flow",
                "Total Cash From Operating Activities",
                "Cash Flow From Continuing Operating Activities",
                "Net Cash Provided By Operating Activities",
            ],
            LineItem::CapitalExpenditure => &[
                "Capital Expenditure",
                "Capital Expenditures",
                "Purchase Of Property Plant And Equipment",
                "Payments To Acquire Property Plant And Equipment",
            ],
            LineItem::ChangeInWorkingCapital => &[
                "Change In Working Capital",
                "Changes In Working Capital",
            ],
            LineItem::NetBorrowing => &[
                "Net Issuance Payments Of Debt",
                "Net Borrowings",
                "Net Debt Issuance",
            ],
            LineItem::DilutedShares => &[
                "Diluted Average Shares",
                "Weighted Average Diluted Shares",
                "Diluted Shares Outstanding",
                "Weighted Average Number Of Diluted Shares Outstanding",
            ],
        }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// A most-recent-first sequence of (period-end, value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    points: Vec<(NaiveDate, Decimal)>,
}

impl LineSeries {
    /// Build a series, enforcing strictly decreasing dates.
    pub fn new(points: Vec<(NaiveDate, Decimal)>) -> CoreResult<Self> {
        for pair in points.windows(2) {
            if pair[0].0 <= pair[1].0 {
                return Err(ValuationError::InvalidInput {
                    field: "line series".into(),
                    reason: format!(
                        "dates must be strictly decreasing, found {} before {}",
                        pair[0].0, pair[1].0
                    ),
                });
            }
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[(NaiveDate, Decimal)] {
        &self.points
    }

    pub fn get(&self, date: NaiveDate) -> Option<Decimal> {
        self.points
            .iter()
            .find(|(d, _)| *d == date)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Market data supplied alongside the statements by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diluted_shares: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_price: Option<Money>,
    /// Provider-quoted beta, used only when no regression beta exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<Decimal>,
}

/// What the normalizer could and could not match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Canonical items with no matching provider label
    pub missing: BTreeSet<LineItem>,
    /// Provider label each matched item came from
    pub matched_from: BTreeMap<LineItem, String>,
    /// Items withheld from downstream use after validation errors
    pub blocked: BTreeSet<LineItem>,
}

/// Canonical, immutable statements for one security.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementBundle {
    pub symbol: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry_code: Option<String>,
    pub market: MarketSnapshot,
    pub metadata: BundleMetadata,
    periods: Vec<NaiveDate>,
    items: BTreeMap<LineItem, LineSeries>,
}

impl StatementBundle {
    /// Assemble a bundle; the period axis is the union of all item dates,
    /// most recent first.
    pub fn new(
        symbol: impl Into<String>,
        provider: impl Into<String>,
        items: BTreeMap<LineItem, LineSeries>,
        market: MarketSnapshot,
        industry_code: Option<String>,
        metadata: BundleMetadata,
    ) -> CoreResult<Self> {
        let symbol = symbol.into();
        let axis: BTreeSet<NaiveDate> = items
            .values()
            .flat_map(|s| s.points().iter().map(|(d, _)| *d))
            .collect();
        if axis.is_empty() {
            return Err(ValuationError::InsufficientData(format!(
                "no statement periods for {symbol}"
            )));
        }
        let periods: Vec<NaiveDate> = axis.into_iter().rev().collect();
        Ok(Self {
            symbol,
            provider: provider.into(),
            industry_code,
            market,
            metadata,
            periods,
            items,
        })
    }

    /// Period-end dates, most recent first.
    pub fn periods(&self) -> &[NaiveDate] {
        &self.periods
    }

    pub fn series(&self, item: LineItem) -> Option<&LineSeries> {
        self.items.get(&item)
    }

    pub fn has(&self, item: LineItem) -> bool {
        self.items.contains_key(&item)
    }

    pub fn items(&self) -> impl Iterator<Item = (&LineItem, &LineSeries)> {
        self.items.iter()
    }

    pub fn value(&self, item: LineItem, date: NaiveDate) -> Option<Decimal> {
        self.items.get(&item).and_then(|s| s.get(date))
    }

    /// Value at the period position `position` of the axis.
    pub fn value_at(&self, item: LineItem, position: usize) -> Option<Decimal> {
        let date = *self.periods.get(position)?;
        self.value(item, date)
    }

    /// Copy of the bundle with `blocked` items withheld.
    pub fn without(&self, blocked: &BTreeSet<LineItem>) -> StatementBundle {
        let mut gated = self.clone();
        for item in blocked {
            gated.items.remove(item);
            gated.metadata.blocked.insert(*item);
        }
        gated
    }
}
