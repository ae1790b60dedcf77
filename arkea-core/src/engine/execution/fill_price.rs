//! Fill price computation: reference prices for market orders and
//! crossing checks for limit orders.

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, OrderSide};

use super::cost_model::CostModel;

/// Which bar price a market order executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceReference {
    Open,
    #[default]
    Close,
}

impl PriceReference {
    pub fn price(self, bar: &Bar) -> f64 {
        match self {
            PriceReference::Open => bar.open,
            PriceReference::Close => bar.close,
        }
    }
}

/// Market fill price: reference price with directional slippage.
pub fn market_fill_price(
    bar: &Bar,
    side: OrderSide,
    reference: PriceReference,
    cost_model: &CostModel,
) -> f64 {
    cost_model.apply_slippage(reference.price(bar), side)
}

/// Limit fill price, or `None` when the bar never reaches the limit.
///
/// A buy crosses when `low <= limit`, a sell when `high >= limit`. A bar that
/// opens through the limit fills at the open, which is the better price.
pub fn limit_fill_price(bar: &Bar, side: OrderSide, limit_price: f64) -> Option<f64> {
    match side {
        OrderSide::Buy if bar.low <= limit_price => Some(bar.open.min(limit_price)),
        OrderSide::Sell if bar.high >= limit_price => Some(bar.open.max(limit_price)),
        _ => None,
    }
}
