//! Liquidity constraint: participation cap on bar volume.
//!
//! Optional: when configured, limits the executed quantity to a fraction of
//! the bar's volume. Orders never outlive their step, so the unfilled
//! remainder is dropped rather than carried.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPolicy {
    /// Maximum participation rate as a fraction of bar volume (0.0 to 1.0].
    /// Example: 0.10 means fill at most 10% of the bar's volume.
    pub max_participation: f64,
}

impl LiquidityPolicy {
    pub fn new(max_participation: f64) -> Self {
        Self { max_participation }
    }

    /// Maximum fillable quantity given bar volume.
    pub fn max_fill_qty(&self, bar_volume: f64) -> f64 {
        (bar_volume * self.max_participation).max(0.0)
    }

    /// Cap a signed desired quantity. Returns `(fill_qty, dropped_qty)`,
    /// both carrying the sign of `desired_qty`.
    pub fn constrain(&self, desired_qty: f64, bar_volume: f64) -> (f64, f64) {
        let max_qty = self.max_fill_qty(bar_volume);
        if desired_qty.abs() <= max_qty {
            (desired_qty, 0.0)
        } else {
            let capped = max_qty.copysign(desired_qty);
            (capped, desired_qty - capped)
        }
    }
}
