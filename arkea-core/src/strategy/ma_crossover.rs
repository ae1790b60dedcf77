//! Moving average crossover: long while the fast SMA is above the slow SMA.
//!
//! Enters the sized long position when the fast SMA of closes is above the
//! slow SMA and the instrument is flat; exits the whole position when the
//! fast SMA is at or below the slow SMA. Needs `slow` visible bars before it
//! acts.

use std::collections::BTreeMap;

use crate::data::HistoryView;
use crate::domain::{Order, Position, QUANTITY_EPSILON};

use super::indicators::sma;
use super::{held_quantity, Sizing, Strategy, StrategyError};

#[derive(Debug, Clone)]
pub struct MovingAverageCrossover {
    pub fast: usize,
    pub slow: usize,
    sizing: Sizing,
}

impl MovingAverageCrossover {
    pub fn new(fast: usize, slow: usize, sizing: Sizing) -> Result<Self, StrategyError> {
        if fast == 0 {
            return Err(StrategyError::InvalidParameter(
                "fast period must be >= 1".to_string(),
            ));
        }
        if slow <= fast {
            return Err(StrategyError::InvalidParameter(format!(
                "slow period ({slow}) must be > fast period ({fast})"
            )));
        }
        sizing.validate()?;
        Ok(Self { fast, slow, sizing })
    }
}

impl Strategy for MovingAverageCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError> {
        let mut orders = Vec::new();
        for instrument in history.instruments() {
            let Some(slow_window) = history.window(instrument, self.slow) else {
                continue;
            };
            let fast_window = &slow_window[self.slow - self.fast..];
            let (Some(fast), Some(slow)) = (sma(fast_window), sma(slow_window)) else {
                continue;
            };

            let held = held_quantity(positions, instrument);
            if fast > slow {
                if held.abs() <= QUANTITY_EPSILON {
                    let close = slow_window[slow_window.len() - 1].close;
                    let quantity = self.sizing.quantity(close);
                    if quantity > 0.0 {
                        orders.push(Order::market(instrument, quantity, history.timestamp()));
                    }
                }
            } else if held > QUANTITY_EPSILON {
                orders.push(Order::market(instrument, -held, history.timestamp()));
            }
        }
        Ok(orders)
    }
}
