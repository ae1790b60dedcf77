use serde::{Deserialize, Serialize};

/// Quantities with absolute value below this are treated as flat.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Open position in one instrument.
///
/// `quantity` is signed (negative = short). Flat positions are never stored
/// by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub quantity: f64,
    pub avg_cost: f64,
}

impl Position {
    pub fn new(instrument: impl Into<String>, quantity: f64, avg_cost: f64) -> Self {
        Self {
            instrument: instrument.into(),
            quantity,
            avg_cost,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > QUANTITY_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.quantity < -QUANTITY_EPSILON
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() <= QUANTITY_EPSILON
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.avg_cost)
    }
}
