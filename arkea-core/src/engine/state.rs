//! Engine configuration, lifecycle state, and run result types.

use serde::{Deserialize, Serialize};

use crate::domain::{ClosedTrade, Fill};
use crate::engine::ledger::{EquitySnapshot, PortfolioLedger};

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub starting_cash: f64,
}

impl EngineConfig {
    pub fn new(starting_cash: f64) -> Self {
        Self { starting_cash }
    }
}

/// Engine lifecycle: `Initialized -> Running -> Completed | Failed`.
/// Cancellation ends in `Failed`; the cause is carried by the returned error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

/// Everything a run produced. Also carried, truncated, by failed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    /// One snapshot per completed step.
    pub equity_curve: Vec<EquitySnapshot>,
    /// Every fill in execution order, rejections included.
    pub trade_log: Vec<Fill>,
    pub final_ledger: PortfolioLedger,
}

impl BacktestResult {
    pub fn starting_cash(&self) -> f64 {
        self.final_ledger.starting_cash()
    }

    /// Equity at the last snapshot, or starting cash for an empty run.
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|s| s.total_equity)
            .unwrap_or_else(|| self.starting_cash())
    }

    pub fn steps(&self) -> usize {
        self.equity_curve.len()
    }

    pub fn executed_fills(&self) -> impl Iterator<Item = &Fill> {
        self.trade_log.iter().filter(|f| !f.is_rejected())
    }

    pub fn rejected_count(&self) -> usize {
        self.trade_log.iter().filter(|f| f.is_rejected()).count()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        self.final_ledger.closed_trades()
    }
}
