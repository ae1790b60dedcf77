//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Reconciliation: every snapshot matches the equity rebuilt from the
//!    trade log, and the final ledger satisfies
//!    `starting cash + realized + unrealized - fees`
//! 2. No short without margin: positions never go negative
//! 3. Metrics are finite or explicitly undefined, never NaN
//! 4. Alignment: forward-filled series always cover a common grid

use std::collections::BTreeMap;
use std::sync::Arc;

use arkea_core::analysis::{MetricValue, PerformanceAnalyzer};
use arkea_core::data::{align, GapPolicy, HistoryView, MarketDataSeries};
use arkea_core::domain::{Bar, Order, Position};
use arkea_core::engine::{BacktestEngine, BacktestResult, BarSimulator, EngineConfig, ExecutionConfig};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.05..0.05_f64, len).prop_map(|moves| {
        let mut price = 100.0;
        moves
            .into_iter()
            .map(|m| {
                price *= 1.0 + m;
                (price * 100.0_f64).round() / 100.0
            })
            .collect()
    })
}

/// Per step: (instrument index, signed quantity, limit offset or market).
fn arb_script(len: usize) -> impl Strategy<Value = Vec<Vec<(usize, f64, Option<f64>)>>> {
    prop::collection::vec(
        prop::collection::vec(
            (0..2usize, -15.0..15.0_f64, prop::option::of(-0.05..0.05_f64)),
            0..3,
        ),
        len,
    )
}

fn bars(closes: &[f64]) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = if i == 0 { c } else { closes[i - 1] };
            Bar::new(
                t0 + Duration::days(i as i64),
                open,
                open.max(c) * 1.01,
                open.min(c) * 0.99,
                c,
                5_000.0,
            )
        })
        .collect()
}

fn series(a: &[f64], b: &[f64]) -> Arc<MarketDataSeries> {
    Arc::new(
        align(
            vec![("AAA".to_string(), bars(a)), ("BBB".to_string(), bars(b))],
            GapPolicy::RejectGap,
        )
        .unwrap(),
    )
}

/// Equity per step rebuilt from the trade log and the raw closes, without
/// going through the ledger.
fn replayed_equity(result: &BacktestResult, closes: &BTreeMap<&str, &[f64]>) -> Vec<f64> {
    let mut cash = result.starting_cash();
    let mut held: BTreeMap<String, f64> = BTreeMap::new();
    let mut fills = result.executed_fills().peekable();
    result
        .equity_curve
        .iter()
        .enumerate()
        .map(|(step, snap)| {
            while let Some(fill) = fills.next_if(|f| f.timestamp <= snap.timestamp) {
                cash -= fill.quantity * fill.price + fill.fee;
                *held.entry(fill.instrument.clone()).or_default() += fill.quantity;
            }
            cash + held
                .iter()
                .map(|(instrument, qty)| qty * closes[instrument.as_str()][step])
                .sum::<f64>()
        })
        .collect()
}

struct Replay {
    script: Vec<Vec<(usize, f64, Option<f64>)>>,
}

impl arkea_core::strategy::Strategy for Replay {
    fn name(&self) -> &str {
        "replay"
    }

    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, arkea_core::strategy::StrategyError> {
        let names = ["AAA", "BBB"];
        let ts = history.timestamp();
        Ok(self.script[history.step()]
            .iter()
            .filter(|(_, qty, _)| qty.round() != 0.0)
            .map(|&(idx, qty, offset)| {
                let instrument = names[idx];
                let qty = qty.round();
                match (offset, history.latest(instrument)) {
                    (Some(off), Some(bar)) => Order::limit(instrument, qty, bar.open * (1.0 + off), ts),
                    _ => Order::market(instrument, qty, ts),
                }
            })
            .collect())
    }
}

const STEPS: usize = 40;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Snapshots agree with an independent replay of the trade log.
    #[test]
    fn reconciliation_holds_every_step(
        a in arb_closes(STEPS),
        b in arb_closes(STEPS),
        script in arb_script(STEPS),
        margin in any::<bool>(),
        slippage in 0.0..20.0_f64,
        fee in 0.0..20.0_f64,
    ) {
        let execution = ExecutionConfig {
            slippage_bps: slippage,
            fee_bps: fee,
            margin_allowed: margin,
            ..ExecutionConfig::default()
        };
        let mut engine = BacktestEngine::new(EngineConfig::new(5_000.0))
            .with_series(series(&a, &b))
            .with_strategy(Box::new(Replay { script }))
            .with_simulator(Box::new(BarSimulator::new(execution).unwrap()));
        let result = engine.run().unwrap();

        prop_assert_eq!(result.equity_curve.len(), STEPS);
        let closes: BTreeMap<&str, &[f64]> = [("AAA", a.as_slice()), ("BBB", b.as_slice())].into();
        let replayed = replayed_equity(&result, &closes);
        for (snap, expected) in result.equity_curve.iter().zip(&replayed) {
            prop_assert!(
                (snap.total_equity - expected).abs() < 1e-6 * expected.abs().max(1.0),
                "snapshot {} vs replay {}", snap.total_equity, expected
            );
        }

        let ledger = &result.final_ledger;
        let unrealized: f64 = ledger
            .positions()
            .values()
            .map(|p| p.unrealized_pnl(closes[p.instrument.as_str()][STEPS - 1]))
            .sum();
        let by_pnl = ledger.starting_cash() + ledger.realized_pnl() + unrealized - ledger.total_fees();
        prop_assert!((result.final_equity() - by_pnl).abs() < 1e-6 * by_pnl.abs().max(1.0));
        if !margin {
            prop_assert!(result.final_ledger.cash() >= -1e-6);
            prop_assert!(result.final_ledger.positions().values().all(|p| p.quantity > 0.0));
        }
    }

    /// Every ratio is finite or Undefined.
    #[test]
    fn metrics_never_nan(
        a in arb_closes(STEPS),
        b in arb_closes(STEPS),
        script in arb_script(STEPS),
    ) {
        let mut engine = BacktestEngine::new(EngineConfig::new(5_000.0))
            .with_series(series(&a, &b))
            .with_strategy(Box::new(Replay { script }))
            .with_simulator(Box::new(BarSimulator::frictionless()));
        let result = engine.run().unwrap();
        let m = PerformanceAnalyzer::default().analyze(&result);
        for value in [
            m.total_return,
            m.annualized_return,
            m.annualized_volatility,
            m.sharpe,
            m.sortino,
            m.calmar,
            m.turnover,
            m.win_rate,
            m.max_drawdown.depth,
        ] {
            if let MetricValue::Defined(v) = value {
                prop_assert!(v.is_finite());
            }
        }
    }

    /// Forward fill always yields a complete grid for every instrument.
    #[test]
    fn forward_fill_produces_common_grid(
        a in arb_closes(30),
        keep in prop::collection::vec(any::<bool>(), 30),
    ) {
        let full = bars(&a);
        let sparse: Vec<Bar> = full
            .iter()
            .zip(&keep)
            .enumerate()
            .filter(|(i, (_, k))| *i == 0 || **k)
            .map(|(_, (bar, _))| bar.clone())
            .collect();
        let s = align(
            vec![("FULL".to_string(), full), ("SPARSE".to_string(), sparse)],
            GapPolicy::ForwardFill,
        )
        .unwrap();
        prop_assert_eq!(s.len(), 30);
        for instrument in ["FULL", "SPARSE"] {
            let b = s.bars(instrument).unwrap();
            prop_assert_eq!(b.len(), 30);
            prop_assert!(b.iter().zip(s.timestamps()).all(|(bar, ts)| bar.timestamp == *ts));
        }
    }
}
