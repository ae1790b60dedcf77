//! Arkea CLI: dataset preparation, backtests, reports and sweeps.
//!
//! Commands:
//! - `build-data`: clean and align raw CSVs (or generate synthetic bars)
//!   into a dataset directory with a manifest
//! - `backtest`: run one backtest from layered TOML configs and save artifacts
//! - `report`: print the Markdown report of a saved run and write metrics.json
//! - `sweep`: run a strategy parameter grid in parallel over one dataset

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use arkea_core::analysis::PerformanceAnalyzer;
use arkea_core::data::GapPolicy;
use arkea_core::strategy::Sizing;
use arkea_runner::data_loader::{build_dataset, build_synthetic_dataset, load_series, SyntheticSpec};
use arkea_runner::export::{generate_report, generate_sweep_report, save_metrics};
use arkea_runner::{
    init_logging, load_artifacts, run_from_config, save_artifacts, BacktestConfig, LogFormat,
    ParamSweep, RunArtifact, SweepGrid,
};

#[derive(Parser)]
#[command(
    name = "arkea",
    about = "Arkea CLI: bar-by-bar backtesting engine"
)]
struct Cli {
    /// Log level (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean and align per-instrument CSVs into a dataset directory.
    BuildData {
        /// Directory of raw `<INSTRUMENT>.csv` files.
        #[arg(long, conflicts_with = "synthetic")]
        input: Option<PathBuf>,

        /// Generate seeded synthetic bars instead of reading CSVs.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Instruments to include (all CSVs in --input when omitted;
        /// required with --synthetic).
        #[arg(long, value_delimiter = ',')]
        instruments: Vec<String>,

        /// Gap policy: reject-gap, forward-fill, drop-instrument-on-gap.
        #[arg(long, default_value = "reject-gap", value_parser = parse_gap_policy)]
        gap_policy: GapPolicy,

        /// Master seed for synthetic data.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First calendar date for synthetic data (YYYY-MM-DD).
        #[arg(long, default_value = "2020-01-02")]
        start: String,

        /// Number of weekday bars per instrument for synthetic data.
        #[arg(long, default_value_t = 504)]
        days: usize,

        /// Output dataset directory.
        #[arg(long, default_value = "data/clean")]
        output: PathBuf,
    },
    /// Run one backtest from one or more TOML configs (later files override).
    Backtest {
        /// Config files, merged in order.
        #[arg(long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Override `[data].dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Directory for run artifacts.
        #[arg(long, default_value = "runs")]
        output: PathBuf,
    },
    /// Print the report of a saved run and write its metrics.json.
    Report {
        /// Artifact directory created by `backtest`.
        #[arg(long)]
        run: PathBuf,
    },
    /// Sweep moving-average and mean-reversion parameters over one dataset.
    Sweep {
        /// Base config files, merged in order. The strategy section is replaced per run.
        #[arg(long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Override `[data].dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Fast moving-average windows.
        #[arg(long, value_delimiter = ',', default_value = "10,20,30")]
        fast: Vec<usize>,

        /// Slow moving-average windows.
        #[arg(long, value_delimiter = ',', default_value = "50,100,200")]
        slow: Vec<usize>,

        /// Mean-reversion lookbacks (none when omitted).
        #[arg(long, value_delimiter = ',')]
        lookback: Vec<usize>,

        /// Mean-reversion entry z-scores.
        #[arg(long, value_delimiter = ',', default_value = "1.0,1.5,2.0")]
        entry_z: Vec<f64>,

        /// Notional per entry.
        #[arg(long, default_value_t = 10_000.0)]
        notional: f64,

        /// Run configurations one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Write sweep.json and sweep.md here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_gap_policy(s: &str) -> std::result::Result<GapPolicy, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown gap policy '{s}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(&cli.log_level, format)?;

    match cli.command {
        Commands::BuildData {
            input,
            synthetic,
            instruments,
            gap_policy,
            seed,
            start,
            days,
            output,
        } => run_build_data(input, synthetic, instruments, gap_policy, seed, &start, days, &output),
        Commands::Backtest {
            configs,
            data_dir,
            output,
        } => run_backtest_cmd(&configs, data_dir, &output),
        Commands::Report { run } => run_report(&run),
        Commands::Sweep {
            configs,
            data_dir,
            fast,
            slow,
            lookback,
            entry_z,
            notional,
            sequential,
            output,
        } => {
            let sizing = Sizing::Notional(notional);
            let mut grid = SweepGrid::ma_crossover(&fast, &slow, sizing);
            if !lookback.is_empty() {
                grid = grid.merge(SweepGrid::mean_reversion(&lookback, &entry_z, 0.0, sizing));
            }
            run_sweep_cmd(&configs, data_dir, &grid, !sequential, output.as_deref())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_build_data(
    input: Option<PathBuf>,
    synthetic: bool,
    instruments: Vec<String>,
    gap_policy: GapPolicy,
    seed: u64,
    start: &str,
    days: usize,
    output: &Path,
) -> Result<()> {
    let manifest = if synthetic {
        if instruments.is_empty() {
            bail!("--synthetic requires --instruments");
        }
        if days == 0 {
            bail!("--days must be at least 1");
        }
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .with_context(|| format!("invalid --start date '{start}'"))?;
        build_synthetic_dataset(
            &SyntheticSpec {
                seed,
                instruments,
                start,
                days,
            },
            output,
        )?
    } else {
        let Some(input) = input else {
            bail!("one of --input or --synthetic is required");
        };
        build_dataset(&input, &instruments, gap_policy, output)?
    };

    println!(
        "Dataset: {} instruments x {} steps ({} to {})",
        manifest.instruments.len(),
        manifest.steps,
        manifest.start.format("%Y-%m-%d"),
        manifest.end.format("%Y-%m-%d"),
    );
    if manifest.dropped_rows > 0 {
        println!("Dropped empty rows: {}", manifest.dropped_rows);
    }
    for (instrument, filled) in &manifest.filled_bars {
        println!("Forward-filled {instrument}: {filled} bars");
    }
    println!("Content hash: {}", manifest.content_hash);
    println!("Written to: {}", output.display());
    Ok(())
}

fn load_config(configs: &[PathBuf], data_dir: Option<PathBuf>) -> Result<BacktestConfig> {
    let mut config = BacktestConfig::load_layered(configs)?;
    if let Some(dir) = data_dir {
        config.data.dir = dir;
    }
    Ok(config)
}

fn run_backtest_cmd(configs: &[PathBuf], data_dir: Option<PathBuf>, output: &Path) -> Result<()> {
    let config = load_config(configs, data_dir)?;

    let artifact = match run_from_config(&config, None) {
        Ok(artifact) => artifact,
        Err(e) => {
            if let Some(partial) = e.partial() {
                tracing::error!(
                    steps = partial.steps(),
                    equity = partial.final_equity(),
                    "run stopped early"
                );
            }
            return Err(e.into());
        }
    };

    print_summary(&artifact);

    // Save full artifact set (run.json, metrics.json, CSVs, report.md)
    let run_dir = save_artifacts(&artifact, output)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn print_summary(artifact: &RunArtifact) {
    let m = &artifact.metrics;
    println!("Strategy:      {}", artifact.config.strategy.label());
    println!("Run ID:        {}", artifact.run_id);
    println!("Steps:         {}", m.steps);
    println!("Final equity:  {:.2}", m.final_equity);
    println!("Total return:  {:.4}", m.total_return);
    println!("Sharpe:        {:.3}", m.sharpe);
    println!("Max drawdown:  {:.4}", m.max_drawdown.depth);
    println!(
        "Fills:         {} ({} rejected)",
        m.fills, m.rejected_orders
    );
    println!("Closed trades: {}", m.closed_trades);
}

fn run_report(run_dir: &Path) -> Result<()> {
    let artifact = load_artifacts(run_dir)?;
    // Recompute from the stored result so the report always reflects the
    // current analyzer.
    let metrics = PerformanceAnalyzer::new(artifact.config.analysis).analyze(&artifact.result);
    let path = save_metrics(&metrics, run_dir)?;
    let artifact = RunArtifact {
        metrics,
        ..artifact
    };
    print!("{}", generate_report(&artifact));
    eprintln!("Metrics written to: {}", path.display());
    Ok(())
}

fn run_sweep_cmd(
    configs: &[PathBuf],
    data_dir: Option<PathBuf>,
    grid: &SweepGrid,
    parallel: bool,
    output: Option<&Path>,
) -> Result<()> {
    if grid.is_empty() {
        bail!("sweep grid is empty (every fast window is >= every slow window?)");
    }
    let config = load_config(configs, data_dir)?;
    let data = load_series(
        &config.data.dir,
        &config.data.instruments,
        config.data.gap_policy,
    )?;

    let entries = ParamSweep::new(config, data.series, data.dataset_hash)
        .with_parallelism(parallel)
        .run(grid);
    let report = generate_sweep_report(&entries);
    print!("{report}");

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let json = serde_json::to_string_pretty(&entries).context("failed to serialize sweep")?;
        std::fs::write(dir.join("sweep.json"), json)?;
        std::fs::write(dir.join("sweep.md"), &report)?;
        println!("Sweep saved to: {}", dir.display());
    }
    Ok(())
}
