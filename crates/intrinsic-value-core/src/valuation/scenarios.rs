use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Rate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Conservative,
    Base,
    Aggressive,
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioKind::Conservative => f.write_str("conservative"),
            ScenarioKind::Base => f.write_str("base"),
            ScenarioKind::Aggressive => f.write_str("aggressive"),
        }
    }
}

/// Adjustments a scenario applies to the historical drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub kind: ScenarioKind,
    /// Multiplier on the historical revenue growth rate
    pub growth_multiplier: Decimal,
    /// Added to the computed WACC (0.02 = +2pp)
    pub wacc_delta: Rate,
    /// Perpetuity growth after the explicit forecast
    pub terminal_growth: Rate,
    /// Multiplier on the EBIT margin
    pub margin_multiplier: Decimal,
    /// Multiplier on capex as a share of revenue
    pub capex_multiplier: Decimal,
}

impl ScenarioSpec {
    pub fn conservative() -> Self {
        Self {
            kind: ScenarioKind::Conservative,
            growth_multiplier: dec!(0.6),
            wacc_delta: dec!(0.02),
            terminal_growth: dec!(0.020),
            margin_multiplier: dec!(0.95),
            capex_multiplier: dec!(1.05),
        }
    }

    pub fn base() -> Self {
        Self {
            kind: ScenarioKind::Base,
            growth_multiplier: Decimal::ONE,
            wacc_delta: Decimal::ZERO,
            terminal_growth: dec!(0.025),
            margin_multiplier: Decimal::ONE,
            capex_multiplier: Decimal::ONE,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            kind: ScenarioKind::Aggressive,
            growth_multiplier: dec!(1.5),
            wacc_delta: dec!(-0.02),
            terminal_growth: dec!(0.030),
            margin_multiplier: dec!(1.05),
            capex_multiplier: dec!(0.95),
        }
    }

    /// Conservative, base and aggressive, in that order.
    pub fn standard_set() -> Vec<ScenarioSpec> {
        vec![Self::conservative(), Self::base(), Self::aggressive()]
    }
}
