//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! Provides three export formats for runs:
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: trade log, closed trades and equity curve as row tables
//! - **Markdown**: human-readable single-run reports and sweep tables
//!
//! All persisted artifacts include a `schema_version` field. Newer versions
//! are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use arkea_core::analysis::{MetricValue, Metrics};
use arkea_core::domain::{ClosedTrade, Fill, FillStatus};
use arkea_core::engine::EquitySnapshot;

use crate::runner::{RunArtifact, SCHEMA_VERSION};
use crate::sweep::{rank_by_sharpe, SweepEntry};

/// Run record inside an artifact directory.
pub const RUN_FILE: &str = "run.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const EQUITY_FILE: &str = "equity.csv";
pub const TRADES_FILE: &str = "trades.csv";
pub const CLOSED_TRADES_FILE: &str = "closed_trades.csv";
pub const REPORT_FILE: &str = "report.md";

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `RunArtifact` to pretty JSON.
pub fn export_json(artifact: &RunArtifact) -> Result<String> {
    serde_json::to_string_pretty(artifact).context("failed to serialize RunArtifact to JSON")
}

/// Deserialize a `RunArtifact` from JSON, rejecting newer schema versions.
pub fn import_json(json: &str) -> Result<RunArtifact> {
    let artifact: RunArtifact =
        serde_json::from_str(json).context("failed to deserialize RunArtifact from JSON")?;
    if artifact.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            artifact.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(artifact)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Equity curve, one row per step.
///
/// Columns: timestamp, cash, positions_value, total_equity
pub fn export_equity_csv(curve: &[EquitySnapshot]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "cash", "positions_value", "total_equity"])?;
    for snap in curve {
        wtr.write_record([
            &snap.timestamp.to_rfc3339(),
            &format!("{:.6}", snap.cash),
            &format!("{:.6}", snap.positions_value()),
            &format!("{:.6}", snap.total_equity),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Trade log, rejections included.
///
/// Columns: order_id, timestamp, instrument, status, reason,
/// requested_quantity, quantity, price, fee, notional
pub fn export_trades_csv(fills: &[Fill]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "order_id",
        "timestamp",
        "instrument",
        "status",
        "reason",
        "requested_quantity",
        "quantity",
        "price",
        "fee",
        "notional",
    ])?;
    for f in fills {
        let (status, reason) = match &f.status {
            FillStatus::Filled => ("filled", String::new()),
            FillStatus::Rejected(reason) => ("rejected", reason.to_string()),
        };
        wtr.write_record([
            &f.order_id.0.to_string(),
            &f.timestamp.to_rfc3339(),
            &f.instrument,
            status,
            &reason,
            &format!("{:.6}", f.requested_quantity),
            &format!("{:.6}", f.quantity),
            &format!("{:.6}", f.price),
            &format!("{:.6}", f.fee),
            &format!("{:.2}", f.notional()),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Realized round trips.
///
/// Columns: timestamp, instrument, quantity, entry_price, exit_price,
/// realized_pnl
pub fn export_closed_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "timestamp",
        "instrument",
        "quantity",
        "entry_price",
        "exit_price",
        "realized_pnl",
    ])?;
    for t in trades {
        wtr.write_record([
            &t.timestamp.to_rfc3339(),
            &t.instrument,
            &format!("{:.6}", t.quantity),
            &format!("{:.6}", t.entry_price),
            &format!("{:.6}", t.exit_price),
            &format!("{:.2}", t.realized_pnl),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Directory name for a run: `{strategy}_{run_id prefix}`. Deterministic,
/// so re-running a config overwrites its own artifacts.
pub fn artifact_dir_name(artifact: &RunArtifact) -> String {
    let prefix: String = artifact.run_id.chars().take(12).collect();
    format!("{}_{}", artifact.result.strategy, prefix)
}

/// Save the full artifact set for a single run.
///
/// Creates `{strategy}_{run_id}/` under `output_dir` containing:
/// - `run.json`: the full `RunArtifact`
/// - `metrics.json`: metrics alone
/// - `equity.csv`, `trades.csv`, `closed_trades.csv`
/// - `report.md`
///
/// Returns the path to the created directory.
pub fn save_artifacts(artifact: &RunArtifact, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(artifact_dir_name(artifact));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write_file(&run_dir.join(RUN_FILE), &export_json(artifact)?)?;
    save_metrics(&artifact.metrics, &run_dir)?;
    write_file(
        &run_dir.join(EQUITY_FILE),
        &export_equity_csv(&artifact.result.equity_curve)?,
    )?;
    write_file(
        &run_dir.join(TRADES_FILE),
        &export_trades_csv(&artifact.result.trade_log)?,
    )?;
    write_file(
        &run_dir.join(CLOSED_TRADES_FILE),
        &export_closed_trades_csv(artifact.result.closed_trades())?,
    )?;
    write_file(&run_dir.join(REPORT_FILE), &generate_report(artifact))?;

    tracing::info!(dir = %run_dir.display(), "artifacts saved");
    Ok(run_dir)
}

/// Write `metrics.json` into `dir`.
pub fn save_metrics(metrics: &Metrics, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(METRICS_FILE);
    let json = serde_json::to_string_pretty(metrics).context("failed to serialize metrics")?;
    write_file(&path, &json)?;
    Ok(path)
}

/// Load a `RunArtifact` from an artifact directory's run.json.
///
/// Rejects newer schema versions.
pub fn load_artifacts(dir: &Path) -> Result<RunArtifact> {
    let path = dir.join(RUN_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── Markdown reports ───────────────────────────────────────────────

fn pct(v: MetricValue) -> String {
    match v {
        MetricValue::Defined(x) => format!("{:.2}%", x * 100.0),
        MetricValue::Undefined => "n/a".to_string(),
    }
}

fn f3(v: MetricValue) -> String {
    format!("{v:.3}")
}

/// Markdown report for a single run.
pub fn generate_report(artifact: &RunArtifact) -> String {
    let result = &artifact.result;
    let m = &artifact.metrics;
    let mut md = String::new();

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Strategy | {} |\n", artifact.config.strategy.label()));
    md.push_str(&format!("| Run ID | {} |\n", artifact.run_id));
    md.push_str(&format!("| Dataset Hash | {} |\n", artifact.dataset_hash));
    if let (Some(first), Some(last)) = (result.equity_curve.first(), result.equity_curve.last()) {
        md.push_str(&format!(
            "| Period | {} to {} |\n",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        ));
    }
    md.push_str(&format!("| Steps | {} |\n", m.steps));
    md.push_str(&format!(
        "| Execution | {:?} price, {} bps slippage, {} bps fees, margin {} |\n",
        artifact.config.execution.price_reference,
        artifact.config.execution.slippage_bps,
        artifact.config.execution.fee_bps,
        if artifact.config.backtest.margin_allowed { "on" } else { "off" },
    ));
    md.push('\n');

    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Starting Cash | {:.2} |\n", m.starting_cash));
    md.push_str(&format!("| Final Equity | {:.2} |\n", m.final_equity));
    md.push_str(&format!("| Total Return | {} |\n", pct(m.total_return)));
    md.push_str(&format!("| Annualized Return | {} |\n", pct(m.annualized_return)));
    md.push_str(&format!(
        "| Annualized Volatility | {} |\n",
        pct(m.annualized_volatility)
    ));
    md.push_str(&format!("| Sharpe | {} |\n", f3(m.sharpe)));
    md.push_str(&format!("| Sortino | {} |\n", f3(m.sortino)));
    md.push_str(&format!("| Calmar | {} |\n", f3(m.calmar)));
    md.push_str(&format!("| Max Drawdown | {} |\n", pct(m.max_drawdown.depth)));
    if let Some(trough) = m.max_drawdown.trough {
        let peak = m
            .max_drawdown
            .peak
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "start".to_string());
        let recovery = m
            .max_drawdown
            .recovery
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "not recovered".to_string());
        md.push_str(&format!(
            "| Drawdown Path | {peak} → {} → {recovery} |\n",
            trough.format("%Y-%m-%d")
        ));
    }
    md.push_str(&format!("| Turnover | {}x |\n", f3(m.turnover)));
    md.push_str(&format!("| Win Rate | {} |\n", pct(m.win_rate)));
    md.push_str(&format!("| Closed Trades | {} |\n", m.closed_trades));
    md.push_str(&format!("| Fills | {} |\n", m.fills));
    md.push_str(&format!("| Rejected Orders | {} |\n", m.rejected_orders));
    md.push_str(&format!("| Total Fees | {:.2} |\n", m.total_fees));
    md.push('\n');

    let positions = result.final_ledger.positions();
    if !positions.is_empty() {
        md.push_str("## Open Positions\n\n");
        md.push_str("| Instrument | Quantity | Avg Cost |\n");
        md.push_str("| --- | ---: | ---: |\n");
        for p in positions.values() {
            md.push_str(&format!(
                "| {} | {} | {:.4} |\n",
                p.instrument, p.quantity, p.avg_cost
            ));
        }
        md.push('\n');
    }

    md
}

/// Markdown table of a sweep, ranked by Sharpe.
pub fn generate_sweep_report(entries: &[SweepEntry]) -> String {
    let mut md = String::new();
    md.push_str("# Sweep Report\n\n");
    md.push_str("| Rank | Strategy | Sharpe | Total Return | Max Drawdown | Trades |\n");
    md.push_str("| ---: | --- | ---: | ---: | ---: | ---: |\n");
    for (rank, entry) in rank_by_sharpe(entries).into_iter().enumerate() {
        match (&entry.metrics, &entry.error) {
            (Some(m), _) => md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                rank + 1,
                entry.label,
                f3(m.sharpe),
                pct(m.total_return),
                pct(m.max_drawdown.depth),
                m.closed_trades
            )),
            (None, error) => md.push_str(&format!(
                "| {} | {} | failed: {} | | | |\n",
                rank + 1,
                entry.label,
                error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BacktestConfig;
    use crate::runner::run_backtest;
    use arkea_core::data::{align, GapPolicy};
    use arkea_core::domain::Bar;
    use arkea_core::strategy::{Sizing, StrategyConfig};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn artifact() -> RunArtifact {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = [100.0, 90.0, 120.0, 110.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(t0 + Duration::days(i as i64), c, c + 1.0, c - 1.0, c, 1e6))
            .collect();
        let series = Arc::new(align(vec![("AAA".to_string(), bars)], GapPolicy::RejectGap).unwrap());
        let mut config = BacktestConfig::default();
        config.strategy = StrategyConfig::BuyAndHold {
            sizing: Sizing::Units(10.0),
        };
        run_backtest(&config, series, "hash", None).unwrap()
    }

    #[test]
    fn json_roundtrip_and_version_guard() {
        let a = artifact();
        let json = export_json(&a).unwrap();
        assert_eq!(import_json(&json).unwrap(), a);

        let mut newer = a.clone();
        newer.schema_version = SCHEMA_VERSION + 1;
        let err = import_json(&export_json(&newer).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn missing_schema_version_defaults() {
        let a = artifact();
        let mut value = serde_json::to_value(&a).unwrap();
        value.as_object_mut().unwrap().remove("schema_version");
        let back = import_json(&value.to_string()).unwrap();
        assert_eq!(back.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn csv_tables_have_one_row_per_record() {
        let a = artifact();
        let equity = export_equity_csv(&a.result.equity_curve).unwrap();
        assert_eq!(equity.lines().count(), 1 + a.result.equity_curve.len());
        assert!(equity.starts_with("timestamp,cash,positions_value,total_equity"));

        let trades = export_trades_csv(&a.result.trade_log).unwrap();
        assert_eq!(trades.lines().count(), 1 + a.result.trade_log.len());
        assert!(trades.lines().nth(1).unwrap().contains(",filled,"));
    }

    #[test]
    fn artifacts_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let a = artifact();
        let run_dir = save_artifacts(&a, dir.path()).unwrap();
        for file in [RUN_FILE, METRICS_FILE, EQUITY_FILE, TRADES_FILE, CLOSED_TRADES_FILE, REPORT_FILE] {
            assert!(run_dir.join(file).is_file(), "{file} missing");
        }
        assert!(run_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("buy_and_hold_"));
        assert_eq!(load_artifacts(&run_dir).unwrap(), a);
    }

    #[test]
    fn report_lists_metrics_and_positions() {
        let report = generate_report(&artifact());
        assert!(report.contains("# Backtest Report"));
        assert!(report.contains("| Sharpe |"));
        assert!(report.contains("| Win Rate | n/a |"));
        assert!(report.contains("## Open Positions"));
        assert!(report.contains("| AAA | 10 |"));
    }
}
