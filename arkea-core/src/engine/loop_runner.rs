//! Bar-by-bar event loop: the heart of the backtesting engine.
//!
//! One pass per grid timestamp:
//! 0. Cancellation check (step boundary only)
//! 1. History view bounded at the current step
//! 2. Strategy decision
//! 3. Order id stamping and execution against the current cross-section
//! 4. Ledger update, then mark-to-market snapshot
//! 5. Record snapshot and fills
//!
//! Any failure in 2–4, including a panic inside the strategy or simulator,
//! aborts the run with the partial result recorded so far.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::data::{MarketDataSeries, SeriesError};
use crate::domain::{Fill, IdGen, Timestamp};
use crate::engine::execution::{ExecutionError, ExecutionSimulator};
use crate::engine::ledger::{EquitySnapshot, LedgerError, PortfolioLedger};
use crate::strategy::{Strategy, StrategyError};

use super::state::{BacktestResult, EngineConfig, EngineStatus};

/// Why a running backtest stopped early.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbortReason {
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("series error: {0}")]
    Series(#[from] SeriesError),

    #[error("{component} panicked: {message}")]
    Panic {
        component: &'static str,
        message: String,
    },

    #[error("timestamps not increasing: {previous} then {next}")]
    NonMonotonicTimestamp { previous: Timestamp, next: Timestamp },
}

/// A run that failed mid-loop, with everything recorded before the failing
/// step.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("backtest aborted at step {step} ({timestamp}): {reason}")]
pub struct BacktestAborted {
    pub reason: AbortReason,
    pub step: usize,
    pub timestamp: Timestamp,
    pub partial: BacktestResult,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("missing engine component: {0}")]
    MissingComponent(&'static str),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("engine cannot run from state {0:?}")]
    InvalidState(EngineStatus),

    /// Cooperative stop. The engine ends in `Failed`.
    #[error("backtest cancelled before step {step}")]
    Cancelled {
        step: usize,
        partial: Box<BacktestResult>,
    },

    #[error(transparent)]
    Aborted(Box<BacktestAborted>),
}

impl EngineError {
    /// The partial result of a cancelled or aborted run.
    pub fn partial(&self) -> Option<&BacktestResult> {
        match self {
            EngineError::Cancelled { partial, .. } => Some(partial),
            EngineError::Aborted(aborted) => Some(&aborted.partial),
            _ => None,
        }
    }
}

/// Single-use backtest driver. Components are injected, then `run` consumes
/// them.
pub struct BacktestEngine {
    config: EngineConfig,
    series: Option<Arc<MarketDataSeries>>,
    strategy: Option<Box<dyn Strategy>>,
    simulator: Option<Box<dyn ExecutionSimulator>>,
    cancel: Option<Arc<AtomicBool>>,
    status: EngineStatus,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            series: None,
            strategy: None,
            simulator: None,
            cancel: None,
            status: EngineStatus::Initialized,
        }
    }

    pub fn with_series(mut self, series: Arc<MarketDataSeries>) -> Self {
        self.series = Some(series);
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_simulator(mut self, simulator: Box<dyn ExecutionSimulator>) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Cooperative cancellation, checked once per step boundary.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.status != EngineStatus::Initialized {
            return Err(EngineError::InvalidState(self.status));
        }
        if self.series.is_none() {
            return Err(EngineError::MissingComponent("series"));
        }
        if self.strategy.is_none() {
            return Err(EngineError::MissingComponent("strategy"));
        }
        if self.simulator.is_none() {
            return Err(EngineError::MissingComponent("simulator"));
        }
        let cash = self.config.starting_cash;
        if !cash.is_finite() || cash <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "starting_cash must be finite and > 0, got {cash}"
            )));
        }
        Ok(())
    }

    /// Run the loop to completion, cancellation, or abort.
    pub fn run(&mut self) -> Result<BacktestResult, EngineError> {
        self.validate()?;
        let (Some(series), Some(mut strategy), Some(mut simulator)) = (
            self.series.take(),
            self.strategy.take(),
            self.simulator.take(),
        ) else {
            return Err(EngineError::MissingComponent("series, strategy or simulator"));
        };
        let cancel = self.cancel.clone();
        self.status = EngineStatus::Running;

        let strategy_name = strategy.name().to_string();
        let span = info_span!("backtest", strategy = %strategy_name, steps = series.len());
        let _enter = span.enter();

        let mut ledger = PortfolioLedger::new(self.config.starting_cash);
        let mut ids = IdGen::default();
        let mut equity_curve: Vec<EquitySnapshot> = Vec::with_capacity(series.len());
        let mut trade_log: Vec<Fill> = Vec::new();
        let mut previous: Option<Timestamp> = None;

        for (step, &timestamp) in series.timestamps().iter().enumerate() {
            if cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
                warn!(step, %timestamp, "backtest cancelled");
                self.status = EngineStatus::Failed;
                return Err(EngineError::Cancelled {
                    step,
                    partial: Box::new(BacktestResult {
                        strategy: strategy_name,
                        equity_curve,
                        trade_log,
                        final_ledger: ledger,
                    }),
                });
            }

            let outcome = match previous {
                Some(prev) if prev >= timestamp => Err(AbortReason::NonMonotonicTimestamp {
                    previous: prev,
                    next: timestamp,
                }),
                _ => run_step(
                    step,
                    &series,
                    strategy.as_mut(),
                    simulator.as_mut(),
                    &mut ledger,
                    &mut ids,
                ),
            };

            match outcome {
                Ok((snapshot, fills)) => {
                    equity_curve.push(snapshot);
                    trade_log.extend(fills);
                    previous = Some(timestamp);
                }
                Err(reason) => {
                    error!(step, %timestamp, %reason, "backtest aborted");
                    self.status = EngineStatus::Failed;
                    return Err(EngineError::Aborted(Box::new(BacktestAborted {
                        reason,
                        step,
                        timestamp,
                        partial: BacktestResult {
                            strategy: strategy_name,
                            equity_curve,
                            trade_log,
                            final_ledger: ledger,
                        },
                    })));
                }
            }
        }

        self.status = EngineStatus::Completed;
        let result = BacktestResult {
            strategy: strategy_name,
            equity_curve,
            trade_log,
            final_ledger: ledger,
        };
        info!(
            steps = result.steps(),
            fills = result.trade_log.len(),
            rejected = result.rejected_count(),
            final_equity = result.final_equity(),
            "backtest completed"
        );
        Ok(result)
    }
}

/// One step of the loop. Returns the step's snapshot and fills.
fn run_step(
    step: usize,
    series: &MarketDataSeries,
    strategy: &mut dyn Strategy,
    simulator: &mut dyn ExecutionSimulator,
    ledger: &mut PortfolioLedger,
    ids: &mut IdGen,
) -> Result<(EquitySnapshot, Vec<Fill>), AbortReason> {
    let history = series.history(step)?;
    let cross_section = series.cross_section(step)?;

    let mut orders = catch_unwind(AssertUnwindSafe(|| {
        strategy.decide(&history, ledger.positions())
    }))
    .map_err(|payload| AbortReason::Panic {
        component: "strategy",
        message: panic_message(payload.as_ref()),
    })??;

    for order in &mut orders {
        order.id = ids.next_order_id();
    }

    let fills = catch_unwind(AssertUnwindSafe(|| {
        simulator.execute(&orders, &cross_section, ledger)
    }))
    .map_err(|payload| AbortReason::Panic {
        component: "simulator",
        message: panic_message(payload.as_ref()),
    })??;

    if !fills.is_empty() {
        debug!(step, orders = orders.len(), fills = fills.len(), "step executed");
    }

    ledger.apply(&fills)?;
    let snapshot = ledger.snapshot(&cross_section)?;
    Ok((snapshot, fills))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
