//! Portfolio ledger: cash, positions, realized P&L and equity snapshots.
//!
//! `apply` is the only mutator. Cost basis is a weighted average of fill
//! prices (fees are tracked separately and never folded into the basis).
//! Reductions, closes and flips realize P&L into `realized_pnl` and append a
//! [`ClosedTrade`].
//!
//! Two accounting identities are checked on every snapshot:
//! - `total_equity == cash + Σ position market value`
//! - `total_equity == starting_cash + realized + unrealized − fees`
//!
//! A mismatch between them beyond tolerance is a fatal ledger error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::CrossSection;
use crate::domain::{ClosedTrade, Fill, OrderId, Position, Timestamp, QUANTITY_EPSILON};

/// Relative tolerance of the reconciliation check.
const RECONCILIATION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid fill {order_id} for {instrument}: {reason}")]
    InvalidFill {
        order_id: OrderId,
        instrument: String,
        reason: String,
    },

    #[error("no bar to mark held position in {instrument} at {timestamp}")]
    MissingMark {
        instrument: String,
        timestamp: Timestamp,
    },

    #[error("ledger reconciliation failed at {timestamp}: cash + positions = {by_positions:.6}, starting cash + pnl - fees = {by_pnl:.6}")]
    Reconciliation {
        timestamp: Timestamp,
        by_positions: f64,
        by_pnl: f64,
    },
}

/// Mark-to-market state of the portfolio at the end of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: Timestamp,
    pub cash: f64,
    /// Market value per open position, keyed by instrument.
    pub position_values: BTreeMap<String, f64>,
    pub total_equity: f64,
}

impl EquitySnapshot {
    pub fn positions_value(&self) -> f64 {
        self.position_values.values().sum()
    }

    /// Gross exposure: Σ |position value|.
    pub fn gross_exposure(&self) -> f64 {
        self.position_values.values().map(|v| v.abs()).sum()
    }
}

/// Cash, open positions, and realized results of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioLedger {
    starting_cash: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    realized_pnl: f64,
    total_fees: f64,
    closed_trades: Vec<ClosedTrade>,
}

impl PortfolioLedger {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            starting_cash,
            cash: starting_cash,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            total_fees: 0.0,
            closed_trades: Vec::new(),
        }
    }

    pub fn starting_cash(&self) -> f64 {
        self.starting_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    /// Signed quantity held (0.0 when flat).
    pub fn quantity(&self, instrument: &str) -> f64 {
        self.positions
            .get(instrument)
            .map(|p| p.quantity)
            .unwrap_or(0.0)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn total_fees(&self) -> f64 {
        self.total_fees
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    /// Apply one step's fills. Rejected fills carry no quantity and are
    /// skipped. The batch is validated up front so a bad fill leaves the
    /// ledger untouched.
    pub fn apply(&mut self, fills: &[Fill]) -> Result<(), LedgerError> {
        for fill in fills {
            validate_fill(fill)?;
        }
        for fill in fills.iter().filter(|f| !f.is_rejected()) {
            if fill.quantity.abs() <= QUANTITY_EPSILON {
                continue;
            }
            self.apply_fill(fill);
        }
        Ok(())
    }

    fn apply_fill(&mut self, fill: &Fill) {
        self.cash += fill.cash_delta();
        self.total_fees += fill.fee;

        let qty = fill.quantity;
        let Some(pos) = self.positions.get_mut(&fill.instrument) else {
            self.positions.insert(
                fill.instrument.clone(),
                Position::new(fill.instrument.clone(), qty, fill.price),
            );
            return;
        };

        if pos.quantity.signum() == qty.signum() {
            // Same direction: weighted-average the cost basis.
            let total = pos.quantity + qty;
            pos.avg_cost = (pos.avg_cost * pos.quantity.abs() + fill.price * qty.abs()) / total.abs();
            pos.quantity = total;
            return;
        }

        let direction = pos.quantity.signum();
        let closing = qty.abs().min(pos.quantity.abs());
        let pnl = closing * direction * (fill.price - pos.avg_cost);
        self.realized_pnl += pnl;
        self.closed_trades.push(ClosedTrade {
            instrument: fill.instrument.clone(),
            timestamp: fill.timestamp,
            quantity: closing * direction,
            entry_price: pos.avg_cost,
            exit_price: fill.price,
            realized_pnl: pnl,
        });

        let remaining = pos.quantity + qty;
        if remaining.abs() <= QUANTITY_EPSILON {
            self.positions.remove(&fill.instrument);
        } else if remaining.signum() == direction {
            pos.quantity = remaining;
        } else {
            // Flipped through zero: the remainder opens at the fill price.
            pos.quantity = remaining;
            pos.avg_cost = fill.price;
        }
    }

    /// Mark every open position at the cross-section's close and compute
    /// total equity. Pure read.
    pub fn snapshot(&self, cross_section: &CrossSection<'_>) -> Result<EquitySnapshot, LedgerError> {
        let timestamp = cross_section.timestamp();
        let mut position_values = BTreeMap::new();
        let mut unrealized = 0.0;
        for (instrument, pos) in &self.positions {
            let mark = cross_section
                .close(instrument)
                .ok_or_else(|| LedgerError::MissingMark {
                    instrument: instrument.clone(),
                    timestamp,
                })?;
            position_values.insert(instrument.clone(), pos.market_value(mark));
            unrealized += pos.unrealized_pnl(mark);
        }

        let total_equity = self.cash + position_values.values().sum::<f64>();
        let by_pnl = self.starting_cash + self.realized_pnl + unrealized - self.total_fees;
        let tolerance = RECONCILIATION_TOLERANCE * total_equity.abs().max(self.starting_cash.abs()).max(1.0);
        if !total_equity.is_finite() || (total_equity - by_pnl).abs() > tolerance {
            return Err(LedgerError::Reconciliation {
                timestamp,
                by_positions: total_equity,
                by_pnl,
            });
        }

        Ok(EquitySnapshot {
            timestamp,
            cash: self.cash,
            position_values,
            total_equity,
        })
    }
}

fn validate_fill(fill: &Fill) -> Result<(), LedgerError> {
    let invalid = |reason: String| LedgerError::InvalidFill {
        order_id: fill.order_id,
        instrument: fill.instrument.clone(),
        reason,
    };
    if fill.is_rejected() {
        if fill.quantity != 0.0 {
            return Err(invalid(format!(
                "rejected fill carries quantity {}",
                fill.quantity
            )));
        }
        return Ok(());
    }
    if !fill.quantity.is_finite() {
        return Err(invalid(format!("non-finite quantity {}", fill.quantity)));
    }
    if !fill.price.is_finite() || fill.price <= 0.0 {
        return Err(invalid(format!("invalid price {}", fill.price)));
    }
    if !fill.fee.is_finite() || fill.fee < 0.0 {
        return Err(invalid(format!("invalid fee {}", fill.fee)));
    }
    if fill.quantity.abs() > fill.requested_quantity.abs() + QUANTITY_EPSILON
        || (fill.quantity != 0.0 && fill.quantity.signum() != fill.requested_quantity.signum())
    {
        return Err(invalid(format!(
            "executed {} exceeds requested {}",
            fill.quantity, fill.requested_quantity
        )));
    }
    Ok(())
}
