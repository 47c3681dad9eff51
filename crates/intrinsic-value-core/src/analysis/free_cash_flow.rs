//! Free cash flow under four definitions.
//!
//! Capital expenditure is taken by magnitude whatever sign the provider uses.
//! `ChangeInWorkingCapital` is read as reported on the cash-flow statement,
//! where a build-up of working capital is a negative number; the working
//! capital investment subtracted below is its negation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::statements::{LineItem, ResolvedPeriod, StatementBundle};
use crate::types::{Money, Rate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FcfMethod {
    /// OCF - |capex|
    Simple,
    /// OCF - |capex| + net borrowing
    Levered,
    /// NI + D&A - |capex| - ΔWC
    OwnerEarnings,
    /// EBIT(1 - t) + D&A - |capex| - ΔWC
    UnleveredFirm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FcfOutcome {
    Available { value: Money, method: FcfMethod },
    Unavailable { method: FcfMethod, reason: String },
}

impl FcfOutcome {
    pub fn value(&self) -> Option<Money> {
        match self {
            FcfOutcome::Available { value, .. } => Some(*value),
            FcfOutcome::Unavailable { .. } => None,
        }
    }

    pub fn method(&self) -> FcfMethod {
        match self {
            FcfOutcome::Available { method, .. } | FcfOutcome::Unavailable { method, .. } => {
                *method
            }
        }
    }

    fn from_result(method: FcfMethod, result: Result<Money, String>) -> Self {
        match result {
            Ok(value) => FcfOutcome::Available { value, method },
            Err(reason) => FcfOutcome::Unavailable { method, reason },
        }
    }
}

/// All four definitions plus the recommended one, as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcfSummary {
    pub simple: FcfOutcome,
    pub levered: FcfOutcome,
    pub owner_earnings: FcfOutcome,
    pub unlevered_firm: FcfOutcome,
    pub recommended: FcfOutcome,
}

/// Free cash flow at one resolved period.
#[derive(Debug, Clone, Copy)]
pub struct FreeCashFlowCalculator<'a> {
    bundle: &'a StatementBundle,
    period: &'a ResolvedPeriod,
}

impl<'a> FreeCashFlowCalculator<'a> {
    pub fn new(bundle: &'a StatementBundle, period: &'a ResolvedPeriod) -> Self {
        Self { bundle, period }
    }

    fn input(&self, item: LineItem) -> Result<Decimal, String> {
        self.bundle
            .value(item, self.period.period_end)
            .ok_or_else(|| format!("{item} missing"))
    }

    fn capex(&self) -> Result<Money, String> {
        Ok(self.input(LineItem::CapitalExpenditure)?.abs())
    }

    fn working_capital_investment(&self) -> Result<Money, String> {
        Ok(-self.input(LineItem::ChangeInWorkingCapital)?)
    }

    fn depreciation(&self) -> Result<Money, String> {
        Ok(self.input(LineItem::DepreciationAmortization)?.abs())
    }

    pub fn simple(&self) -> FcfOutcome {
        let result = (|| -> Result<Money, String> {
            Ok(self.input(LineItem::OperatingCashFlow)? - self.capex()?)
        })();
        FcfOutcome::from_result(FcfMethod::Simple, result)
    }

    pub fn levered(&self) -> FcfOutcome {
        let result = (|| -> Result<Money, String> {
            Ok(self.input(LineItem::OperatingCashFlow)? - self.capex()?
                + self.input(LineItem::NetBorrowing)?)
        })();
        FcfOutcome::from_result(FcfMethod::Levered, result)
    }

    pub fn owner_earnings(&self) -> FcfOutcome {
        let result = (|| -> Result<Money, String> {
            Ok(self.input(LineItem::NetIncome)? + self.depreciation()?
                - self.capex()?
                - self.working_capital_investment()?)
        })();
        FcfOutcome::from_result(FcfMethod::OwnerEarnings, result)
    }

    pub fn unlevered_firm(&self, tax_rate: Option<Rate>) -> FcfOutcome {
        let result = (|| -> Result<Money, String> {
            let t = tax_rate.ok_or_else(|| "tax rate missing".to_string())?;
            let ebit = self.input(LineItem::OperatingIncome)?;
            Ok(ebit * (Decimal::ONE - t) + self.depreciation()?
                - self.capex()?
                - self.working_capital_investment()?)
        })();
        FcfOutcome::from_result(FcfMethod::UnleveredFirm, result)
    }

    /// Unlevered firm FCF when EBIT, a tax rate and the working-capital
    /// change are all present; otherwise simple; otherwise the first of
    /// levered / owner earnings that can be computed.
    pub fn recommend(&self, tax_rate: Option<Rate>) -> FcfOutcome {
        let unlevered = self.unlevered_firm(tax_rate);
        if unlevered.value().is_some() {
            return unlevered;
        }
        let simple = self.simple();
        if simple.value().is_some() {
            return simple;
        }
        let levered = self.levered();
        if levered.value().is_some() {
            return levered;
        }
        let owner = self.owner_earnings();
        if owner.value().is_some() {
            return owner;
        }
        FcfOutcome::Unavailable {
            method: FcfMethod::Simple,
            reason: "no free cash flow definition has its inputs".into(),
        }
    }

    pub fn summary(&self, tax_rate: Option<Rate>) -> FcfSummary {
        FcfSummary {
            simple: self.simple(),
            levered: self.levered(),
            owner_earnings: self.owner_earnings(),
            unlevered_firm: self.unlevered_firm(tax_rate),
            recommended: self.recommend(tax_rate),
        }
    }
}
