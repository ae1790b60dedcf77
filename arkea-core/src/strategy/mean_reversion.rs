//! Mean reversion: buy oversold closes, exit once they revert.
//!
//! The z-score of the latest close is measured against the trailing
//! `lookback` closes (current bar included). Flat and `z < -entry_z` buys
//! the sized quantity; long and `z > -exit_z` sells the whole position.

use std::collections::BTreeMap;

use crate::data::HistoryView;
use crate::domain::{Order, Position, QUANTITY_EPSILON};

use super::indicators::zscore;
use super::{held_quantity, Sizing, Strategy, StrategyError};

#[derive(Debug, Clone)]
pub struct MeanReversion {
    pub lookback: usize,
    pub entry_z: f64,
    pub exit_z: f64,
    sizing: Sizing,
}

impl MeanReversion {
    pub fn new(
        lookback: usize,
        entry_z: f64,
        exit_z: f64,
        sizing: Sizing,
    ) -> Result<Self, StrategyError> {
        if lookback < 2 {
            return Err(StrategyError::InvalidParameter(format!(
                "lookback must be >= 2, got {lookback}"
            )));
        }
        if !entry_z.is_finite() || entry_z <= 0.0 {
            return Err(StrategyError::InvalidParameter(format!(
                "entry_z must be finite and > 0, got {entry_z}"
            )));
        }
        if !exit_z.is_finite() || exit_z >= entry_z {
            return Err(StrategyError::InvalidParameter(format!(
                "exit_z must be finite and < entry_z ({entry_z}), got {exit_z}"
            )));
        }
        sizing.validate()?;
        Ok(Self {
            lookback,
            entry_z,
            exit_z,
            sizing,
        })
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError> {
        let mut orders = Vec::new();
        for instrument in history.instruments() {
            let Some(window) = history.window(instrument, self.lookback) else {
                continue;
            };
            let Some(z) = zscore(window) else {
                continue;
            };

            let held = held_quantity(positions, instrument);
            if held.abs() <= QUANTITY_EPSILON {
                if z < -self.entry_z {
                    let close = window[window.len() - 1].close;
                    let quantity = self.sizing.quantity(close);
                    if quantity > 0.0 {
                        orders.push(Order::market(instrument, quantity, history.timestamp()));
                    }
                }
            } else if held > QUANTITY_EPSILON && z > -self.exit_z {
                orders.push(Order::market(instrument, -held, history.timestamp()));
            }
        }
        Ok(orders)
    }
}
