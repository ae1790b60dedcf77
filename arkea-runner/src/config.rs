//! Serializable backtest configuration.
//!
//! A config is one or more TOML files. Layers are deep-merged before
//! parsing: tables merge key by key, any other value in a later layer
//! replaces the earlier one. Every field has a default, so an overlay only
//! needs the keys it changes.
//!
//! ```toml
//! [backtest]
//! starting_cash = 100000.0
//! margin_allowed = false
//!
//! [data]
//! dir = "data/clean"
//! instruments = ["SPY", "QQQ"]
//! gap_policy = "forward-fill"
//!
//! [execution]
//! price_reference = "close"
//! slippage_bps = 5.0
//! fee_bps = 1.0
//!
//! [analysis]
//! periods_per_year = 252.0
//!
//! [strategy]
//! kind = "moving_average_crossover"
//! fast = 10
//! slow = 50
//! sizing = { notional = 10000.0 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use arkea_core::analysis::AnalyzerConfig;
use arkea_core::data::GapPolicy;
use arkea_core::domain::RunId;
use arkea_core::engine::{ExecutionConfig, PriceReference};
use arkea_core::strategy::StrategyConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no config files given")]
    NoLayers,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[backtest]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSection {
    pub starting_cash: f64,
    pub margin_allowed: bool,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            starting_cash: 100_000.0,
            margin_allowed: false,
        }
    }
}

/// `[data]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Directory of cleaned per-instrument CSV files.
    pub dir: PathBuf,
    /// Instruments to load. Empty means every CSV in `dir`.
    pub instruments: Vec<String>,
    pub gap_policy: GapPolicy,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/clean"),
            instruments: Vec::new(),
            gap_policy: GapPolicy::default(),
        }
    }
}

/// `[execution]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub price_reference: PriceReference,
    pub slippage_bps: f64,
    pub fee_bps: f64,
    pub max_participation: Option<f64>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            price_reference: PriceReference::Close,
            slippage_bps: 5.0,
            fee_bps: 1.0,
            max_participation: None,
        }
    }
}

/// Complete configuration of one backtest run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    pub data: DataSection,
    pub execution: ExecutionSection,
    pub analysis: AnalyzerConfig,
    pub strategy: StrategyConfig,
}

impl BacktestConfig {
    /// Parse a single TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_layered(&[path.to_path_buf()])
    }

    /// Load and deep-merge several TOML files, later files overriding
    /// earlier ones.
    pub fn load_layered(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        if paths.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths {
            merge_values(&mut merged, read_layer(path)?);
        }
        let config: Self = merged.try_into().map_err(|source| ConfigError::Parse {
            origin: display_paths(paths),
            source,
        })?;
        config.validate()?;
        tracing::debug!(layers = paths.len(), "config loaded");
        Ok(config)
    }

    /// Structural checks that do not need data. Strategy parameters are
    /// checked when the strategy is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cash = self.backtest.starting_cash;
        if !cash.is_finite() || cash <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "backtest.starting_cash must be finite and > 0, got {cash}"
            )));
        }
        let ppy = self.analysis.periods_per_year;
        if !ppy.is_finite() || ppy <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "analysis.periods_per_year must be finite and > 0, got {ppy}"
            )));
        }
        if !self.analysis.risk_free_rate.is_finite() {
            return Err(ConfigError::Invalid(
                "analysis.risk_free_rate must be finite".to_string(),
            ));
        }
        self.execution_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The simulator configuration implied by `[execution]` and
    /// `[backtest].margin_allowed`.
    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            price_reference: self.execution.price_reference,
            slippage_bps: self.execution.slippage_bps,
            fee_bps: self.execution.fee_bps,
            margin_allowed: self.backtest.margin_allowed,
            max_participation: self.execution.max_participation,
        }
    }

    /// Same config with a different strategy.
    pub fn with_strategy(&self, strategy: StrategyConfig) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    /// Deterministic id: BLAKE3 of the config's canonical JSON.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ConfigError::Invalid(format!("config is not serializable: {e}")))?;
        Ok(RunId::from_bytes(&json))
    }
}

fn read_layer(path: &Path) -> Result<toml::Value, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

/// In-place deep merge of `overlay` into `base`.
pub fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_values(existing, value)
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}
