//! Strategies: the per-step decision unit driven by the engine.
//!
//! A strategy sees only a [`HistoryView`] truncated at the current step and
//! the ledger's open positions. It returns the orders to execute against the
//! current bar. State (indicator buffers, entry flags) lives in the instance;
//! the engine calls `decide` once per step, in timestamp order, from one
//! thread.
//!
//! Variants are a flat set selected by [`StrategyConfig`].

pub mod buy_and_hold;
pub mod idle;
pub mod indicators;
pub mod ma_crossover;
pub mod mean_reversion;

pub use buy_and_hold::BuyAndHold;
pub use idle::Idle;
pub use ma_crossover::MovingAverageCrossover;
pub use mean_reversion::MeanReversion;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::HistoryView;
use crate::domain::{Order, Position};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("invalid strategy parameter: {0}")]
    InvalidParameter(String),

    #[error("strategy {strategy} failed: {message}")]
    Failed { strategy: String, message: String },
}

/// Per-step decision unit.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Orders to execute against the current bar. Orders must be issued at
    /// `history.timestamp()`.
    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError>;
}

/// Position size for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sizing {
    /// Fixed number of units.
    Units(f64),
    /// Whole units worth at most this much at the latest close.
    Notional(f64),
}

impl Default for Sizing {
    fn default() -> Self {
        Sizing::Units(1.0)
    }
}

impl Sizing {
    /// Units to buy at `price`. Zero when the notional does not cover one unit.
    pub fn quantity(&self, price: f64) -> f64 {
        match *self {
            Sizing::Units(q) => q,
            Sizing::Notional(n) => {
                if price > 0.0 {
                    (n / price).floor()
                } else {
                    0.0
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        let (label, value) = match *self {
            Sizing::Units(q) => ("units", q),
            Sizing::Notional(n) => ("notional", n),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(StrategyError::InvalidParameter(format!(
                "sizing {label} must be finite and > 0, got {value}"
            )));
        }
        Ok(())
    }
}

/// Serializable strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Idle,
    BuyAndHold {
        #[serde(default)]
        sizing: Sizing,
    },
    MovingAverageCrossover {
        fast: usize,
        slow: usize,
        #[serde(default)]
        sizing: Sizing,
    },
    MeanReversion {
        lookback: usize,
        entry_z: f64,
        #[serde(default)]
        exit_z: f64,
        #[serde(default)]
        sizing: Sizing,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::BuyAndHold {
            sizing: Sizing::default(),
        }
    }
}

impl StrategyConfig {
    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            StrategyConfig::Idle => "idle".to_string(),
            StrategyConfig::BuyAndHold { .. } => "buy_and_hold".to_string(),
            StrategyConfig::MovingAverageCrossover { fast, slow, .. } => {
                format!("ma_crossover_{fast}_{slow}")
            }
            StrategyConfig::MeanReversion {
                lookback, entry_z, ..
            } => format!("mean_reversion_{lookback}_{entry_z}"),
        }
    }

    /// Construct a fresh strategy instance. Each run owns its own.
    pub fn build(&self) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(match *self {
            StrategyConfig::Idle => Box::new(Idle),
            StrategyConfig::BuyAndHold { sizing } => Box::new(BuyAndHold::new(sizing)?),
            StrategyConfig::MovingAverageCrossover { fast, slow, sizing } => {
                Box::new(MovingAverageCrossover::new(fast, slow, sizing)?)
            }
            StrategyConfig::MeanReversion {
                lookback,
                entry_z,
                exit_z,
                sizing,
            } => Box::new(MeanReversion::new(lookback, entry_z, exit_z, sizing)?),
        })
    }
}

/// Signed quantity currently held in `instrument`.
pub(crate) fn held_quantity(positions: &BTreeMap<String, Position>, instrument: &str) -> f64 {
    positions.get(instrument).map(|p| p.quantity).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notional_sizing_floors_units() {
        assert_eq!(Sizing::Notional(1_000.0).quantity(300.0), 3.0);
        assert_eq!(Sizing::Notional(100.0).quantity(300.0), 0.0);
        assert_eq!(Sizing::Units(7.0).quantity(300.0), 7.0);
    }

    #[test]
    fn sizing_rejects_non_positive() {
        assert!(Sizing::Units(0.0).validate().is_err());
        assert!(Sizing::Notional(f64::NAN).validate().is_err());
    }

    #[test]
    fn config_builds_named_strategies() {
        let cases = [
            (StrategyConfig::Idle, "idle"),
            (StrategyConfig::default(), "buy_and_hold"),
            (
                StrategyConfig::MovingAverageCrossover {
                    fast: 5,
                    slow: 20,
                    sizing: Sizing::Units(1.0),
                },
                "ma_crossover",
            ),
            (
                StrategyConfig::MeanReversion {
                    lookback: 20,
                    entry_z: 2.0,
                    exit_z: 0.0,
                    sizing: Sizing::Units(1.0),
                },
                "mean_reversion",
            ),
        ];
        for (config, name) in cases {
            assert_eq!(config.build().unwrap().name(), name);
        }
    }

    #[test]
    fn config_rejects_bad_parameters() {
        let bad = StrategyConfig::MovingAverageCrossover {
            fast: 20,
            slow: 5,
            sizing: Sizing::Units(1.0),
        };
        assert!(matches!(
            bad.build().map(|_| ()),
            Err(StrategyError::InvalidParameter(_))
        ));
    }

    #[test]
    fn config_serde_is_tagged() {
        let config = StrategyConfig::MovingAverageCrossover {
            fast: 5,
            slow: 20,
            sizing: Sizing::Notional(10_000.0),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"kind\":\"moving_average_crossover\""));
        let back: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
