//! Orders produced by a strategy and consumed by the execution simulator
//! within the same step.

use super::bar::Timestamp;
use super::ids::OrderId;
use serde::{Deserialize, Serialize};

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    /// Fill at the configured reference price (open or close) plus slippage.
    Market,
    /// Fill at the limit price or better, only if the bar range crosses it.
    Limit { limit_price: f64 },
}

/// Buy or sell, derived from the sign of an order's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1.0 for buys, -1.0 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

/// A single-step order.
///
/// `quantity` is signed: positive buys, negative sells. Orders never persist
/// across steps; anything the simulator does not fill is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Stamped by the engine before execution. Strategies leave it unassigned.
    pub id: OrderId,
    pub instrument: String,
    pub quantity: f64,
    pub kind: OrderKind,
    pub issued_at: Timestamp,
}

impl Order {
    pub fn market(instrument: impl Into<String>, quantity: f64, issued_at: Timestamp) -> Self {
        Self {
            id: OrderId::UNASSIGNED,
            instrument: instrument.into(),
            quantity,
            kind: OrderKind::Market,
            issued_at,
        }
    }

    pub fn limit(
        instrument: impl Into<String>,
        quantity: f64,
        limit_price: f64,
        issued_at: Timestamp,
    ) -> Self {
        Self {
            id: OrderId::UNASSIGNED,
            instrument: instrument.into(),
            quantity,
            kind: OrderKind::Limit { limit_price },
            issued_at,
        }
    }

    pub fn side(&self) -> OrderSide {
        if self.quantity >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side() == OrderSide::Buy
    }

    /// Structural validity: finite non-zero quantity and a positive finite
    /// limit price for limit orders. Returns a description of the first defect.
    pub fn validate(&self) -> Result<(), String> {
        if !self.quantity.is_finite() || self.quantity == 0.0 {
            return Err(format!(
                "order {} for {} has invalid quantity {}",
                self.id, self.instrument, self.quantity
            ));
        }
        if let OrderKind::Limit { limit_price } = self.kind {
            if !limit_price.is_finite() || limit_price <= 0.0 {
                return Err(format!(
                    "order {} for {} has invalid limit price {limit_price}",
                    self.id, self.instrument
                ));
            }
        }
        Ok(())
    }
}
