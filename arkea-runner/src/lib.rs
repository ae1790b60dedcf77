//! Arkea Runner: backtest orchestration around `arkea-core`.
//!
//! This crate builds on `arkea-core` to provide:
//! - Layered TOML configuration with deterministic run ids
//! - CSV dataset loading, cleaning and synthetic generation
//! - Single-run execution and parallel parameter sweeps
//! - JSON/CSV/Markdown artifacts with schema versioning
//! - Logging setup for binaries

pub mod config;
pub mod data_loader;
pub mod export;
pub mod logging;
pub mod runner;
pub mod sweep;

pub use config::{BacktestConfig, ConfigError};
pub use data_loader::{
    build_dataset, build_synthetic_dataset, load_series, DatasetManifest, LoadError, LoadedData,
    SyntheticSpec,
};
pub use export::{generate_report, load_artifacts, save_artifacts};
pub use logging::{init_logging, LogFormat};
pub use runner::{run_backtest, run_from_config, RunArtifact, RunError, SCHEMA_VERSION};
pub use sweep::{rank_by_sharpe, ParamSweep, SweepEntry, SweepGrid};
