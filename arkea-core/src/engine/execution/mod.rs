//! Execution simulator: turns one step's orders into fills against the
//! step's cross-section.
//!
//! The simulator reads the ledger but never mutates it; the engine applies
//! the returned fills. Cash and holdings are projected across orders within
//! one step so a batch cannot overspend what a single order could not.

pub mod cost_model;
pub mod fill_price;
pub mod liquidity;

pub use cost_model::CostModel;
pub use fill_price::PriceReference;
pub use liquidity::LiquidityPolicy;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::CrossSection;
use crate::domain::{
    Bar, Fill, Order, OrderId, OrderKind, OrderSide, RejectReason, Timestamp, QUANTITY_EPSILON,
};
use crate::engine::ledger::PortfolioLedger;

use self::fill_price::{limit_fill_price, market_fill_price};

/// Fatal execution failures. Rejections are not errors; they come back as
/// zero-quantity fills.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order {order_id} references {instrument}, which has no bar at {timestamp}")]
    UnknownInstrument {
        order_id: OrderId,
        instrument: String,
        timestamp: Timestamp,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order {order_id} was issued at {issued_at} but executes against the bar at {bar_timestamp}")]
    TimestampMismatch {
        order_id: OrderId,
        issued_at: Timestamp,
        bar_timestamp: Timestamp,
    },

    #[error("invalid execution config: {0}")]
    InvalidConfig(String),
}

/// Strategy of turning orders into fills. Called once per step by the engine.
pub trait ExecutionSimulator: Send {
    fn execute(
        &mut self,
        orders: &[Order],
        cross_section: &CrossSection<'_>,
        ledger: &PortfolioLedger,
    ) -> Result<Vec<Fill>, ExecutionError>;
}

/// Parameters of the bar-based execution model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub price_reference: PriceReference,
    pub slippage_bps: f64,
    pub fee_bps: f64,
    /// When false, buys may not drive cash negative and sells may not open
    /// or extend a short.
    pub margin_allowed: bool,
    /// Fraction of bar volume one order may consume. `None` = unlimited.
    ///
    /// Zero-volume bars, including forward-filled ones, admit no quantity:
    /// every order on such a bar is dropped, exits included.
    pub max_participation: Option<f64>,
}

/// Basis points in one whole. Slippage or fees at this level consume the
/// entire sell proceeds.
const BPS_LIMIT: f64 = 10_000.0;

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            price_reference: PriceReference::Close,
            slippage_bps: 0.0,
            fee_bps: 0.0,
            margin_allowed: false,
            max_participation: None,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if !(0.0..BPS_LIMIT).contains(&self.slippage_bps) {
            return Err(ExecutionError::InvalidConfig(format!(
                "slippage_bps must be in [0, 10000), got {}",
                self.slippage_bps
            )));
        }
        if !(0.0..BPS_LIMIT).contains(&self.fee_bps) {
            return Err(ExecutionError::InvalidConfig(format!(
                "fee_bps must be in [0, 10000), got {}",
                self.fee_bps
            )));
        }
        if let Some(p) = self.max_participation {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ExecutionError::InvalidConfig(format!(
                    "max_participation must be in (0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.slippage_bps, self.fee_bps)
    }
}

/// Default simulator: fills every order against the current bar.
#[derive(Debug, Clone)]
pub struct BarSimulator {
    config: ExecutionConfig,
    cost_model: CostModel,
    liquidity: Option<LiquidityPolicy>,
}

impl BarSimulator {
    pub fn new(config: ExecutionConfig) -> Result<Self, ExecutionError> {
        config.validate()?;
        Ok(Self {
            cost_model: config.cost_model(),
            liquidity: config.max_participation.map(LiquidityPolicy::new),
            config,
        })
    }

    /// Close-price fills, no costs, no margin.
    pub fn frictionless() -> Self {
        let config = ExecutionConfig::default();
        Self {
            cost_model: config.cost_model(),
            liquidity: None,
            config,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn bar_for<'a>(
        &self,
        order: &Order,
        cross_section: &CrossSection<'a>,
    ) -> Result<&'a Bar, ExecutionError> {
        order.validate().map_err(ExecutionError::InvalidOrder)?;
        if order.issued_at != cross_section.timestamp() {
            return Err(ExecutionError::TimestampMismatch {
                order_id: order.id,
                issued_at: order.issued_at,
                bar_timestamp: cross_section.timestamp(),
            });
        }
        cross_section
            .get(&order.instrument)
            .ok_or_else(|| ExecutionError::UnknownInstrument {
                order_id: order.id,
                instrument: order.instrument.clone(),
                timestamp: cross_section.timestamp(),
            })
    }
}

impl ExecutionSimulator for BarSimulator {
    fn execute(
        &mut self,
        orders: &[Order],
        cross_section: &CrossSection<'_>,
        ledger: &PortfolioLedger,
    ) -> Result<Vec<Fill>, ExecutionError> {
        let timestamp = cross_section.timestamp();
        let mut cash = ledger.cash();
        let mut held: BTreeMap<&str, f64> = BTreeMap::new();
        let mut fills = Vec::with_capacity(orders.len());

        for order in orders {
            let bar = self.bar_for(order, cross_section)?;
            let side = order.side();

            let price = match order.kind {
                OrderKind::Market => {
                    market_fill_price(bar, side, self.config.price_reference, &self.cost_model)
                }
                OrderKind::Limit { limit_price } => {
                    match limit_fill_price(bar, side, limit_price) {
                        Some(price) => price,
                        None => {
                            debug!(order = %order.id, instrument = %order.instrument, limit_price, "limit not reached, order dropped");
                            continue;
                        }
                    }
                }
            };

            let mut quantity = order.quantity;
            if let Some(policy) = &self.liquidity {
                let (capped, dropped) = policy.constrain(quantity, bar.volume);
                if dropped != 0.0 {
                    debug!(order = %order.id, instrument = %order.instrument, capped, dropped, "participation cap applied");
                }
                if capped.abs() <= QUANTITY_EPSILON {
                    if bar.volume <= 0.0 {
                        warn!(order = %order.id, instrument = %order.instrument, %timestamp, "zero-volume bar under participation cap, order dropped");
                    }
                    continue;
                }
                quantity = capped;
            }

            let position = *held
                .entry(order.instrument.as_str())
                .or_insert_with(|| ledger.quantity(&order.instrument));

            if !self.config.margin_allowed {
                let rejection = match side {
                    OrderSide::Sell if position + quantity < -QUANTITY_EPSILON => {
                        Some(RejectReason::ShortSaleNotAllowed {
                            held: position,
                            requested: order.quantity,
                        })
                    }
                    OrderSide::Buy => {
                        let required = self.cost_model.buy_cost(quantity, price);
                        (required > cash + QUANTITY_EPSILON).then_some(
                            RejectReason::InsufficientCash {
                                required,
                                available: cash,
                            },
                        )
                    }
                    OrderSide::Sell => None,
                };
                if let Some(reason) = rejection {
                    debug!(order = %order.id, instrument = %order.instrument, %reason, "order rejected");
                    fills.push(Fill::rejected(
                        order.id,
                        order.instrument.as_str(),
                        timestamp,
                        order.quantity,
                        reason,
                    ));
                    continue;
                }
            }

            let fee = self.cost_model.fee(quantity, price);
            cash += -quantity * price - fee;
            held.insert(order.instrument.as_str(), position + quantity);
            fills.push(Fill::filled(
                order.id,
                order.instrument.as_str(),
                timestamp,
                order.quantity,
                quantity,
                price,
                fee,
            ));
        }

        Ok(fills)
    }
}
