//! Parameter sweeps: run a grid of strategy configurations over one shared
//! series, optionally in parallel.
//!
//! Every run builds its own strategy, simulator and ledger; only the
//! immutable series and the cancel flag are shared. Results come back in
//! grid order regardless of scheduling.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use arkea_core::analysis::Metrics;
use arkea_core::data::MarketDataSeries;
use arkea_core::strategy::{Sizing, StrategyConfig};

use crate::config::BacktestConfig;
use crate::runner::run_backtest;

/// Strategy configurations to sweep over.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SweepGrid {
    pub strategies: Vec<StrategyConfig>,
}

impl SweepGrid {
    pub fn new(strategies: Vec<StrategyConfig>) -> Self {
        Self { strategies }
    }

    /// Every `(fast, slow)` moving-average pair with `fast < slow`.
    pub fn ma_crossover(fast: &[usize], slow: &[usize], sizing: Sizing) -> Self {
        let mut strategies = Vec::new();
        for &f in fast {
            for &s in slow {
                // Skip invalid combinations (fast >= slow)
                if f >= s {
                    continue;
                }
                strategies.push(StrategyConfig::MovingAverageCrossover {
                    fast: f,
                    slow: s,
                    sizing,
                });
            }
        }
        Self { strategies }
    }

    /// Every `(lookback, entry_z)` pair at a fixed exit threshold.
    pub fn mean_reversion(lookbacks: &[usize], entry_z: &[f64], exit_z: f64, sizing: Sizing) -> Self {
        let mut strategies = Vec::new();
        for &lookback in lookbacks {
            for &entry in entry_z {
                strategies.push(StrategyConfig::MeanReversion {
                    lookback,
                    entry_z: entry,
                    exit_z,
                    sizing,
                });
            }
        }
        Self { strategies }
    }

    /// Default crossover grid: fast 10/20/30 against slow 50/100/200.
    pub fn ma_crossover_default() -> Self {
        Self::ma_crossover(&[10, 20, 30], &[50, 100, 200], Sizing::Notional(10_000.0))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Extend with another grid's strategies.
    pub fn merge(mut self, other: SweepGrid) -> Self {
        self.strategies.extend(other.strategies);
        self
    }
}

/// Outcome of one configuration. Failed runs keep their error text
/// instead of failing the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub label: String,
    pub strategy: StrategyConfig,
    pub run_id: String,
    pub metrics: Option<Metrics>,
    pub error: Option<String>,
}

impl SweepEntry {
    fn sharpe(&self) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.sharpe.value())
    }
}

/// Sweep executor over one dataset.
pub struct ParamSweep {
    base: BacktestConfig,
    series: Arc<MarketDataSeries>,
    dataset_hash: String,
    cancel: Option<Arc<AtomicBool>>,
    parallel: bool,
}

impl ParamSweep {
    pub fn new(base: BacktestConfig, series: Arc<MarketDataSeries>, dataset_hash: impl Into<String>) -> Self {
        Self {
            base,
            series,
            dataset_hash: dataset_hash.into(),
            cancel: None,
            parallel: true,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Shared cancel flag observed by every run.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run every configuration in the grid. Entries follow grid order.
    pub fn run(&self, grid: &SweepGrid) -> Vec<SweepEntry> {
        tracing::info!(
            configs = grid.len(),
            parallel = self.parallel,
            "starting sweep"
        );
        let entries: Vec<SweepEntry> = if self.parallel {
            grid.strategies
                .par_iter()
                .map(|strategy| self.run_one(strategy))
                .collect()
        } else {
            grid.strategies
                .iter()
                .map(|strategy| self.run_one(strategy))
                .collect()
        };
        let failed = entries.iter().filter(|e| e.error.is_some()).count();
        if failed > 0 {
            tracing::warn!(failed, total = entries.len(), "sweep finished with failed runs");
        }
        entries
    }

    fn run_one(&self, strategy: &StrategyConfig) -> SweepEntry {
        let config = self.base.with_strategy(strategy.clone());
        let run_id = config
            .run_id()
            .map(|id| id.to_hex())
            .unwrap_or_default();
        let outcome = run_backtest(
            &config,
            Arc::clone(&self.series),
            &self.dataset_hash,
            self.cancel.clone(),
        );
        let (metrics, error) = match outcome {
            Ok(artifact) => (Some(artifact.metrics), None),
            Err(e) => {
                tracing::warn!(strategy = %strategy.label(), error = %e, "sweep run failed");
                (None, Some(e.to_string()))
            }
        };
        SweepEntry {
            label: strategy.label(),
            strategy: strategy.clone(),
            run_id,
            metrics,
            error,
        }
    }
}

/// Entries sorted by Sharpe ratio, best first. Undefined Sharpe and failed
/// runs sort last; ties keep grid order.
pub fn rank_by_sharpe(entries: &[SweepEntry]) -> Vec<&SweepEntry> {
    let mut ranked: Vec<&SweepEntry> = entries.iter().collect();
    ranked.sort_by(|a, b| match (a.sharpe(), b.sharpe()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    ranked
}
