//! Closed-trade records: one per position reduction, close, or flip.

use super::bar::Timestamp;
use serde::{Deserialize, Serialize};

/// Realized slice of a position.
///
/// `quantity` carries the sign of the position that was closed (positive
/// for a long being sold down, negative for a short being covered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub instrument: String,
    pub timestamp: Timestamp,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
}

impl ClosedTrade {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }

    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) / self.entry_price * self.quantity.signum()
    }
}
