//! Backtesting engine: the event loop and the components it drives.
//!
//! The engine replays a [`MarketDataSeries`](crate::data::MarketDataSeries)
//! step by step, asks the strategy for orders, executes them through the
//! simulator, and records the ledger's equity after every step.

pub mod execution;
pub mod ledger;
pub mod loop_runner;
pub mod state;

pub use execution::{
    BarSimulator, CostModel, ExecutionConfig, ExecutionError, ExecutionSimulator,
    LiquidityPolicy, PriceReference,
};
pub use ledger::{EquitySnapshot, LedgerError, PortfolioLedger};
pub use loop_runner::{AbortReason, BacktestAborted, BacktestEngine, EngineError};
pub use state::{BacktestResult, EngineConfig, EngineStatus};
