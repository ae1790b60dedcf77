//! Backtest runner: wires configuration, data, engine and analyzer.
//!
//! Two entry points:
//! - `run_from_config()`: loads the dataset named in `[data]`, then runs.
//!   Used by the CLI.
//! - `run_backtest()`: takes an already-loaded series. Used by sweeps,
//!   which share one series across many runs.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use arkea_core::analysis::{Metrics, PerformanceAnalyzer};
use arkea_core::data::MarketDataSeries;
use arkea_core::engine::{
    BacktestEngine, BacktestResult, BarSimulator, EngineConfig, EngineError, ExecutionError,
};
use arkea_core::strategy::StrategyError;

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::{load_series, LoadError};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
    #[error("execution config error: {0}")]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RunError {
    /// Partial result carried by a cancelled or aborted run.
    pub fn partial(&self) -> Option<&BacktestResult> {
        match self {
            RunError::Engine(e) => e.partial(),
            _ => None,
        }
    }
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything persisted for one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Hex BLAKE3 of the config.
    pub run_id: String,
    /// Content hash of the aligned series the run consumed.
    pub dataset_hash: String,
    pub config: BacktestConfig,
    pub result: BacktestResult,
    pub metrics: Metrics,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run one backtest over a loaded series.
///
/// Builds a fresh strategy and simulator from `config`, so concurrent
/// calls share nothing but the series.
pub fn run_backtest(
    config: &BacktestConfig,
    series: Arc<MarketDataSeries>,
    dataset_hash: &str,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<RunArtifact, RunError> {
    config.validate()?;
    let run_id = config.run_id()?.to_hex();
    let strategy = config.strategy.build()?;
    let simulator = BarSimulator::new(config.execution_config())?;

    let mut engine = BacktestEngine::new(EngineConfig::new(config.backtest.starting_cash))
        .with_series(series)
        .with_strategy(strategy)
        .with_simulator(Box::new(simulator));
    if let Some(cancel) = cancel {
        engine = engine.with_cancel_flag(cancel);
    }

    let result = engine.run()?;
    let metrics = PerformanceAnalyzer::new(config.analysis).analyze(&result);
    tracing::info!(
        run_id = %&run_id[..12],
        strategy = %result.strategy,
        final_equity = result.final_equity(),
        total_return = %metrics.total_return,
        "run complete"
    );

    Ok(RunArtifact {
        schema_version: SCHEMA_VERSION,
        run_id,
        dataset_hash: dataset_hash.to_string(),
        config: config.clone(),
        result,
        metrics,
    })
}

/// Load the configured dataset and run one backtest.
pub fn run_from_config(
    config: &BacktestConfig,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<RunArtifact, RunError> {
    config.validate()?;
    let data = load_series(
        &config.data.dir,
        &config.data.instruments,
        config.data.gap_policy,
    )?;
    run_backtest(config, data.series, &data.dataset_hash, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkea_core::data::{align, GapPolicy};
    use arkea_core::domain::Bar;
    use arkea_core::strategy::{Sizing, StrategyConfig};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn series(closes: &[f64]) -> Arc<MarketDataSeries> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(t0 + Duration::days(i as i64), c, c + 1.0, c - 1.0, c, 1e6))
            .collect();
        Arc::new(align(vec![("AAA".to_string(), bars)], GapPolicy::RejectGap).unwrap())
    }

    fn config() -> BacktestConfig {
        let mut config = BacktestConfig::default();
        config.backtest.starting_cash = 1_000.0;
        config.execution.slippage_bps = 0.0;
        config.execution.fee_bps = 0.0;
        config.strategy = StrategyConfig::BuyAndHold {
            sizing: Sizing::Units(1.0),
        };
        config
    }

    #[test]
    fn artifact_carries_ids_and_metrics() {
        let artifact = run_backtest(&config(), series(&[100.0, 110.0, 105.0]), "abc", None).unwrap();
        assert_eq!(artifact.schema_version, SCHEMA_VERSION);
        assert_eq!(artifact.run_id, config().run_id().unwrap().to_hex());
        assert_eq!(artifact.dataset_hash, "abc");
        assert_eq!(artifact.result.steps(), 3);
        assert_eq!(artifact.metrics.steps, 3);
        // bought at 100, marked at 105
        assert!((artifact.result.final_equity() - 1_005.0).abs() < 1e-9);
    }

    #[test]
    fn run_id_names_the_config_and_dataset_hash_names_the_data() {
        let a = series(&[100.0, 110.0, 105.0]);
        let b = series(&[100.0, 90.0, 95.0]);
        let on_a = run_backtest(&config(), Arc::clone(&a), &a.content_hash(), None).unwrap();
        let on_b = run_backtest(&config(), Arc::clone(&b), &b.content_hash(), None).unwrap();
        assert_eq!(on_a.run_id, on_b.run_id);
        assert_ne!(on_a.dataset_hash, on_b.dataset_hash);
    }

    #[test]
    fn invalid_strategy_params_surface_as_strategy_error() {
        let config = config().with_strategy(StrategyConfig::MovingAverageCrossover {
            fast: 20,
            slow: 10,
            sizing: Sizing::Units(1.0),
        });
        let err = run_backtest(&config, series(&[100.0; 5]), "", None).unwrap_err();
        assert!(matches!(err, RunError::Strategy(_)), "{err}");
    }

    #[test]
    fn cancelled_run_keeps_partial_result() {
        let cancel = Arc::new(AtomicBool::new(true));
        let err = run_backtest(&config(), series(&[100.0; 5]), "", Some(cancel.clone())).unwrap_err();
        assert!(cancel.load(Ordering::SeqCst));
        assert!(matches!(err, RunError::Engine(EngineError::Cancelled { .. })));
        assert_eq!(err.partial().map(|p| p.steps()), Some(0));
    }

    #[test]
    fn missing_data_dir_is_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.data.dir = dir.path().join("nope");
        config.data.instruments = vec!["AAA".to_string()];
        let err = run_from_config(&config, None).unwrap_err();
        assert!(matches!(err, RunError::Data(LoadError::MissingInstrument { .. })));
    }
}
