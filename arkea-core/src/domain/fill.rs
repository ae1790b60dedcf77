//! Fill reports produced by the execution simulator.

use super::bar::Timestamp;
use super::ids::OrderId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an order was rejected instead of executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// A buy would have driven cash negative with margin disabled.
    InsufficientCash { required: f64, available: f64 },
    /// A sell would have opened or extended a short with margin disabled.
    ShortSaleNotAllowed { held: f64, requested: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientCash {
                required,
                available,
            } => write!(
                f,
                "InsufficientCash (required {required:.2}, available {available:.2})"
            ),
            RejectReason::ShortSaleNotAllowed { held, requested } => write!(
                f,
                "ShortSaleNotAllowed (held {held}, requested {requested})"
            ),
        }
    }
}

/// Outcome of an order that reached the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillStatus {
    Filled,
    Rejected(RejectReason),
}

/// Immutable execution record. Rejections are recorded as zero-quantity
/// fills so the trade log explains every order that was not executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub instrument: String,
    pub timestamp: Timestamp,
    /// Signed quantity the strategy asked for.
    pub requested_quantity: f64,
    /// Signed quantity actually executed (0.0 for rejections).
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub status: FillStatus,
}

impl Fill {
    pub fn filled(
        order_id: OrderId,
        instrument: impl Into<String>,
        timestamp: Timestamp,
        requested_quantity: f64,
        quantity: f64,
        price: f64,
        fee: f64,
    ) -> Self {
        Self {
            order_id,
            instrument: instrument.into(),
            timestamp,
            requested_quantity,
            quantity,
            price,
            fee,
            status: FillStatus::Filled,
        }
    }

    pub fn rejected(
        order_id: OrderId,
        instrument: impl Into<String>,
        timestamp: Timestamp,
        requested_quantity: f64,
        reason: RejectReason,
    ) -> Self {
        Self {
            order_id,
            instrument: instrument.into(),
            timestamp,
            requested_quantity,
            quantity: 0.0,
            price: 0.0,
            fee: 0.0,
            status: FillStatus::Rejected(reason),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, FillStatus::Rejected(_))
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match &self.status {
            FillStatus::Rejected(reason) => Some(reason),
            FillStatus::Filled => None,
        }
    }

    /// Absolute traded notional (0.0 for rejections).
    pub fn notional(&self) -> f64 {
        (self.quantity * self.price).abs()
    }

    /// Cash impact of this fill: buys pay notional + fee, sells receive
    /// notional - fee.
    pub fn cash_delta(&self) -> f64 {
        -self.quantity * self.price - self.fee
    }
}
