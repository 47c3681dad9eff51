use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::dcf::{discount, equity_from_enterprise, per_share};
use super::map_ordered;
use crate::config::GridConfig;
use crate::types::{Money, Rate};

/// One grid cell: value per share, or why it has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum GridCell {
    Value(Money),
    Infeasible(String),
}

impl GridCell {
    pub fn value(&self) -> Option<Money> {
        match self {
            GridCell::Value(v) => Some(*v),
            GridCell::Infeasible(_) => None,
        }
    }
}

/// Value per share across WACC (rows) and terminal growth (columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityGrid {
    pub wacc_values: Vec<Rate>,
    pub terminal_growth_values: Vec<Rate>,
    /// cells[i][j] at wacc_values[i], terminal_growth_values[j]
    pub cells: Vec<Vec<GridCell>>,
    /// (row, column) of the unperturbed base case
    pub base_position: (usize, usize),
}

impl SensitivityGrid {
    pub fn cell(&self, row: usize, column: usize) -> Option<&GridCell> {
        self.cells.get(row)?.get(column)
    }

    pub fn base_cell(&self) -> Option<&GridCell> {
        self.cell(self.base_position.0, self.base_position.1)
    }
}

/// base + i * step for i in -n..=n; the center is `base` itself.
fn axis(base: Rate, step: Rate, steps_each_side: u32) -> Vec<Rate> {
    let n = i64::from(steps_each_side);
    (-n..=n)
        .map(|i| match i {
            0 => base,
            _ => base + step * Decimal::from(i),
        })
        .collect()
}

/// Re-discount the base projection's free cash flows under every
/// (WACC, terminal growth) pair. Rows may be evaluated in parallel.
pub fn build_grid(
    free_cash_flows: &[Money],
    net_debt: Money,
    diluted_shares: Option<Decimal>,
    base_wacc: Rate,
    base_terminal_growth: Rate,
    config: &GridConfig,
) -> SensitivityGrid {
    let wacc_values = axis(base_wacc, config.wacc_step, config.steps_each_side);
    let terminal_growth_values =
        axis(base_terminal_growth, config.growth_step, config.steps_each_side);

    let cells = map_ordered(&wacc_values, |wacc| {
        terminal_growth_values
            .iter()
            .map(|growth| {
                let outcome = discount(free_cash_flows, *wacc, *growth)
                    .and_then(|d| equity_from_enterprise(d.enterprise_value, net_debt))
                    .and_then(|equity| per_share(equity, diluted_shares))
                    .map(|(_, value)| value);
                match outcome {
                    Ok(v) => GridCell::Value(v),
                    Err((_, reason)) => GridCell::Infeasible(reason),
                }
            })
            .collect()
    });

    let center = config.steps_each_side as usize;
    SensitivityGrid {
        wacc_values,
        terminal_growth_values,
        cells,
        base_position: (center, center),
    }
}
