//! Cost model: slippage and fee calculation.
//!
//! Slippage is directional: buyers pay more (higher price), sellers receive less (lower price).
//! Fees are symmetric per side in basis points of traded notional.

use crate::domain::OrderSide;

/// Execution friction in basis points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// Slippage in basis points, applied directionally to market fills.
    pub slippage_bps: f64,
    /// Fee in basis points of `|quantity × price|`.
    pub fee_bps: f64,
}

impl CostModel {
    pub fn new(slippage_bps: f64, fee_bps: f64) -> Self {
        Self {
            slippage_bps,
            fee_bps,
        }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Apply slippage to a reference price.
    ///
    /// `reference * (1 + sign * slippage_bps / 10_000)` where sign is +1 for buys.
    pub fn apply_slippage(&self, reference: f64, side: OrderSide) -> f64 {
        if self.slippage_bps == 0.0 {
            return reference;
        }
        reference * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    /// Fee for executing `quantity` (signed) at `price`.
    pub fn fee(&self, quantity: f64, price: f64) -> f64 {
        (quantity * price).abs() * self.fee_bps / 10_000.0
    }

    /// Cash a buy of `quantity` at `price` would consume, fee included.
    pub fn buy_cost(&self, quantity: f64, price: f64) -> f64 {
        quantity.abs() * price + self.fee(quantity, price)
    }
}
