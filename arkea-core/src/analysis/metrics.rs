//! Performance metrics: pure functions over a finished run.
//!
//! Every ratio is a [`MetricValue`]: `Defined` with a finite number, or
//! `Undefined` when the inputs cannot support it (zero variance, no closed
//! trades, no drawdown). NaN and infinities never leave this module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{ClosedTrade, Timestamp};
use crate::engine::{BacktestResult, EquitySnapshot};

/// Below this a standard deviation counts as zero.
const STD_EPSILON: f64 = 1e-15;

/// A metric that may be undefined. Serializes as a number or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Defined(f64),
    Undefined,
}

impl MetricValue {
    /// `Defined` for finite input, `Undefined` otherwise.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            MetricValue::Defined(value)
        } else {
            MetricValue::Undefined
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            MetricValue::Defined(v) => Some(v),
            MetricValue::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, MetricValue::Defined(_))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Defined(v) => match f.precision() {
                Some(p) => write!(f, "{v:.p$}"),
                None => write!(f, "{v}"),
            },
            MetricValue::Undefined => write!(f, "n/a"),
        }
    }
}

/// Analyzer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Steps per year used for annualization (252 for daily bars).
    pub periods_per_year: f64,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

/// Deepest peak-to-trough decline of the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxDrawdown {
    /// Decline as a positive fraction of the peak (0.2 = 20%).
    pub depth: MetricValue,
    /// Timestamp of the peak. `None` when the peak is the starting cash.
    pub peak: Option<Timestamp>,
    pub trough: Option<Timestamp>,
    /// First timestamp after the trough back at or above the peak.
    pub recovery: Option<Timestamp>,
}

impl MaxDrawdown {
    fn none() -> Self {
        Self {
            depth: MetricValue::Defined(0.0),
            peak: None,
            trough: None,
            recovery: None,
        }
    }
}

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub steps: usize,
    pub starting_cash: f64,
    pub final_equity: f64,
    pub total_return: MetricValue,
    pub annualized_return: MetricValue,
    pub annualized_volatility: MetricValue,
    pub sharpe: MetricValue,
    pub sortino: MetricValue,
    pub max_drawdown: MaxDrawdown,
    pub calmar: MetricValue,
    pub turnover: MetricValue,
    pub win_rate: MetricValue,
    pub closed_trades: usize,
    pub fills: usize,
    pub rejected_orders: usize,
    pub total_fees: f64,
}

/// Post-run analytics. Pure: the same result always yields the same metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceAnalyzer {
    config: AnalyzerConfig,
}

impl PerformanceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, result: &BacktestResult) -> Metrics {
        let start = result.starting_cash();
        let curve = &result.equity_curve;
        let returns = step_returns(start, curve);
        let ppy = self.config.periods_per_year;
        let rf = self.config.risk_free_rate;

        let annualized_return = annualized_return(start, curve, ppy);
        let max_drawdown = max_drawdown(start, curve);
        let calmar = match (annualized_return, max_drawdown.depth) {
            (MetricValue::Defined(r), MetricValue::Defined(dd)) if dd > 0.0 => {
                MetricValue::from_f64(r / dd)
            }
            _ => MetricValue::Undefined,
        };

        Metrics {
            steps: curve.len(),
            starting_cash: start,
            final_equity: result.final_equity(),
            total_return: total_return(start, curve),
            annualized_return,
            annualized_volatility: annualized_volatility(&returns, ppy),
            sharpe: sharpe_ratio(&returns, rf, ppy),
            sortino: sortino_ratio(&returns, rf, ppy),
            max_drawdown,
            calmar,
            turnover: turnover(result),
            win_rate: win_rate(result.closed_trades()),
            closed_trades: result.closed_trades().len(),
            fills: result.executed_fills().count(),
            rejected_orders: result.rejected_count(),
            total_fees: result.final_ledger.total_fees(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Simple return per step; the first step is measured against starting cash.
pub fn step_returns(starting_cash: f64, curve: &[EquitySnapshot]) -> Vec<f64> {
    let mut prev = starting_cash;
    curve
        .iter()
        .map(|snap| {
            let r = if prev != 0.0 {
                snap.total_equity / prev - 1.0
            } else {
                0.0
            };
            prev = snap.total_equity;
            r
        })
        .collect()
}

/// (final - start) / start.
pub fn total_return(starting_cash: f64, curve: &[EquitySnapshot]) -> MetricValue {
    match curve.last() {
        Some(last) if starting_cash > 0.0 => {
            MetricValue::from_f64(last.total_equity / starting_cash - 1.0)
        }
        _ => MetricValue::Undefined,
    }
}

/// (final / start)^(periods_per_year / n) - 1.
pub fn annualized_return(
    starting_cash: f64,
    curve: &[EquitySnapshot],
    periods_per_year: f64,
) -> MetricValue {
    let Some(last) = curve.last() else {
        return MetricValue::Undefined;
    };
    if starting_cash <= 0.0 || last.total_equity <= 0.0 {
        return MetricValue::Undefined;
    }
    let growth = last.total_equity / starting_cash;
    MetricValue::from_f64(growth.powf(periods_per_year / curve.len() as f64) - 1.0)
}

/// Sample standard deviation of returns × √periods_per_year.
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> MetricValue {
    match sample_std(returns) {
        Some(std) => MetricValue::from_f64(std * periods_per_year.sqrt()),
        None => MetricValue::Undefined,
    }
}

/// (mean - rf/ppy) / std × √ppy. Undefined for zero variance.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> MetricValue {
    let Some(std) = sample_std(returns) else {
        return MetricValue::Undefined;
    };
    if std < STD_EPSILON {
        return MetricValue::Undefined;
    }
    let excess = mean(returns) - risk_free_rate / periods_per_year;
    MetricValue::from_f64(excess / std * periods_per_year.sqrt())
}

/// Like Sharpe, with downside deviation in place of std.
/// Undefined when no step fell below the risk-free rate.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> MetricValue {
    if returns.len() < 2 {
        return MetricValue::Undefined;
    }
    let per_step_rf = risk_free_rate / periods_per_year;
    let downside_sq: f64 = returns
        .iter()
        .map(|r| (r - per_step_rf).min(0.0).powi(2))
        .sum();
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < STD_EPSILON {
        return MetricValue::Undefined;
    }
    let excess = mean(returns) - per_step_rf;
    MetricValue::from_f64(excess / downside_std * periods_per_year.sqrt())
}

/// Deepest decline from a running peak. Starting cash is the initial peak.
pub fn max_drawdown(starting_cash: f64, curve: &[EquitySnapshot]) -> MaxDrawdown {
    let mut peak_value = starting_cash;
    let mut peak_at: Option<Timestamp> = None;
    let mut worst = MaxDrawdown::none();
    let mut worst_depth = 0.0;
    let mut worst_peak_value = starting_cash;
    let mut trough_index = None;

    for (i, snap) in curve.iter().enumerate() {
        if snap.total_equity >= peak_value {
            peak_value = snap.total_equity;
            peak_at = Some(snap.timestamp);
            continue;
        }
        if peak_value <= 0.0 {
            continue;
        }
        let depth = (peak_value - snap.total_equity) / peak_value;
        if depth > worst_depth {
            worst_depth = depth;
            worst_peak_value = peak_value;
            trough_index = Some(i);
            worst.peak = peak_at;
            worst.trough = Some(snap.timestamp);
        }
    }

    let Some(trough) = trough_index else {
        return worst;
    };
    worst.depth = MetricValue::from_f64(worst_depth);
    worst.recovery = curve[trough + 1..]
        .iter()
        .find(|snap| snap.total_equity >= worst_peak_value)
        .map(|snap| snap.timestamp);
    worst
}

/// Σ |executed notional| / mean equity.
pub fn turnover(result: &BacktestResult) -> MetricValue {
    if result.equity_curve.is_empty() {
        return MetricValue::Undefined;
    }
    let mean_equity = result
        .equity_curve
        .iter()
        .map(|s| s.total_equity)
        .sum::<f64>()
        / result.equity_curve.len() as f64;
    if mean_equity <= 0.0 {
        return MetricValue::Undefined;
    }
    let traded: f64 = result.executed_fills().map(|f| f.notional()).sum();
    MetricValue::from_f64(traded / mean_equity)
}

/// Fraction of closed trades with positive realized P&L.
pub fn win_rate(trades: &[ClosedTrade]) -> MetricValue {
    if trades.is_empty() {
        return MetricValue::Undefined;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    MetricValue::Defined(winners as f64 / trades.len() as f64)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PortfolioLedger;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn day(i: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::days(i)
    }

    fn curve(values: &[f64]) -> Vec<EquitySnapshot> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquitySnapshot {
                timestamp: day(i as i64),
                cash: v,
                position_values: BTreeMap::new(),
                total_equity: v,
            })
            .collect()
    }

    fn result(start: f64, values: &[f64]) -> BacktestResult {
        BacktestResult {
            strategy: "test".to_string(),
            equity_curve: curve(values),
            trade_log: Vec::new(),
            final_ledger: PortfolioLedger::new(start),
        }
    }

    #[test]
    fn first_return_is_against_starting_cash() {
        let r = step_returns(100.0, &curve(&[110.0, 99.0]));
        assert!((r[0] - 0.10).abs() < 1e-12);
        assert!((r[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn flat_curve_has_undefined_ratios() {
        let m = PerformanceAnalyzer::default().analyze(&result(1_000.0, &[1_000.0; 10]));
        assert_eq!(m.total_return, MetricValue::Defined(0.0));
        assert_eq!(m.sharpe, MetricValue::Undefined);
        assert_eq!(m.sortino, MetricValue::Undefined);
        assert_eq!(m.calmar, MetricValue::Undefined);
        assert_eq!(m.win_rate, MetricValue::Undefined);
        assert_eq!(m.max_drawdown.depth, MetricValue::Defined(0.0));
        assert_eq!(m.max_drawdown.trough, None);
    }

    #[test]
    fn annualized_return_compounds() {
        // 10% over 126 steps at 252/yr → 1.1^2 - 1 = 0.21
        let mut values = vec![1_000.0; 125];
        values.push(1_100.0);
        let r = annualized_return(1_000.0, &curve(&values), 252.0);
        assert!((r.value().unwrap() - 0.21).abs() < 1e-9);
    }

    #[test]
    fn drawdown_with_peak_trough_recovery() {
        let dd = max_drawdown(100.0, &curve(&[120.0, 90.0, 100.0, 125.0]));
        assert!((dd.depth.value().unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(dd.peak, Some(day(0)));
        assert_eq!(dd.trough, Some(day(1)));
        assert_eq!(dd.recovery, Some(day(3)));
    }

    #[test]
    fn drawdown_from_starting_cash_has_no_peak_timestamp() {
        let dd = max_drawdown(100.0, &curve(&[80.0, 90.0]));
        assert!((dd.depth.value().unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(dd.peak, None);
        assert_eq!(dd.trough, Some(day(0)));
        assert_eq!(dd.recovery, None);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let m = mean(&returns);
        let s = sample_std(&returns).unwrap();
        let expected = m / s * 252.0_f64.sqrt();
        let got = sharpe_ratio(&returns, 0.0, 252.0).value().unwrap();
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn undefined_serializes_as_null() {
        let json = serde_json::to_string(&MetricValue::Undefined).unwrap();
        assert_eq!(json, "null");
        let back: MetricValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(back, MetricValue::Defined(1.5));
        let back: MetricValue = serde_json::from_str("null").unwrap();
        assert_eq!(back, MetricValue::Undefined);
    }

    #[test]
    fn analyze_is_idempotent() {
        let r = result(1_000.0, &[1_010.0, 990.0, 1_030.0, 1_000.0]);
        let analyzer = PerformanceAnalyzer::default();
        assert_eq!(analyzer.analyze(&r), analyzer.analyze(&r));
    }

    #[test]
    fn display_respects_precision() {
        assert_eq!(format!("{:.2}", MetricValue::Defined(0.12345)), "0.12");
        assert_eq!(format!("{:.2}", MetricValue::Undefined), "n/a");
    }
}
