//! Arkea Core: domain types, market data, strategies, execution, ledger,
//! event loop, and performance analysis.
//!
//! This crate contains the heart of the backtesting engine:
//! - Domain types (bars, orders, fills, positions, closed trades)
//! - Aligned, immutable market data with lookahead-free history views
//! - Strategy trait and the built-in strategy set
//! - Bar-based execution simulator with slippage, fees and liquidity caps
//! - Portfolio ledger with per-step reconciliation
//! - Synchronous bar-by-bar event loop with abort and cancellation
//! - Post-run performance metrics

pub mod analysis;
pub mod data;
pub mod domain;
pub mod engine;
pub mod rng;
pub mod strategy;
