//! Look-ahead contamination tests.
//!
//! Invariant: at step t a strategy can observe bars 0..=t and nothing later.
//!
//! Method: a recording strategy records what it can see at every step, and the
//! built-in strategies are run on a truncated and a full series; decisions on
//! the shared prefix must be identical.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arkea_core::data::{align, GapPolicy, HistoryView, MarketDataSeries};
use arkea_core::domain::{Bar, Order, Position, Timestamp};
use arkea_core::engine::{BacktestEngine, BarSimulator, EngineConfig, ExecutionConfig};
use arkea_core::strategy::{Sizing, Strategy, StrategyConfig, StrategyError};
use chrono::{Duration, TimeZone, Utc};

/// Generate N bars of synthetic OHLCV data with realistic variation.
fn make_test_bars(n: usize) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let mut bars = Vec::with_capacity(n);
    let mut price: f64 = 100.0;

    for i in 0..n {
        // Deterministic pseudo-random walk using a simple LCG
        let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1);
        let change = ((seed % 200) as f64 - 100.0) * 0.05; // -5.0 to +5.0
        price = (price + change).max(10.0);

        let open = price - 0.5;
        let close = price + 0.3;
        let high = open.max(close) + 2.0;
        let low = open.min(close) - 2.0;
        bars.push(Bar::new(
            t0 + Duration::days(i as i64),
            open,
            high,
            low,
            close,
            1_000.0 + i as f64 * 100.0,
        ));
    }
    bars
}

fn series(n: usize) -> MarketDataSeries {
    align(vec![("TEST".to_string(), make_test_bars(n))], GapPolicy::RejectGap).unwrap()
}

/// Records the latest visible timestamp and bar count at each step.
struct HorizonCheck {
    seen: Arc<Mutex<Vec<(usize, Timestamp, usize)>>>,
}

impl Strategy for HorizonCheck {
    fn name(&self) -> &str {
        "horizon-check"
    }

    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError> {
        let visible = history.bars("TEST").map(|b| b.len()).unwrap_or(0);
        let latest = history
            .latest("TEST")
            .map(|b| b.timestamp)
            .ok_or_else(|| StrategyError::Failed {
                strategy: "horizon-check".to_string(),
                message: "no bars visible".to_string(),
            })?;
        self.seen
            .lock()
            .map_err(|_| StrategyError::Failed {
                strategy: "horizon-check".to_string(),
                message: "poisoned".to_string(),
            })?
            .push((history.step(), latest, visible));
        Ok(Vec::new())
    }
}

#[test]
fn strategy_never_sees_past_current_step() {
    let s = Arc::new(series(50));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine = BacktestEngine::new(EngineConfig::new(1_000.0))
        .with_series(Arc::clone(&s))
        .with_strategy(Box::new(HorizonCheck {
            seen: Arc::clone(&seen),
        }))
        .with_simulator(Box::new(BarSimulator::frictionless()));
    engine.run().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 50);
    for &(step, latest, visible) in seen.iter() {
        assert_eq!(latest, s.timestamps()[step], "step {step} saw a later bar");
        assert_eq!(visible, step + 1);
    }
}

#[test]
fn history_view_is_truncated() {
    let s = series(30);
    for step in [0, 7, 29] {
        let view = s.history(step).unwrap();
        assert_eq!(view.len(), step + 1);
        assert_eq!(view.bars("TEST").unwrap().len(), step + 1);
        assert_eq!(view.timestamp(), s.timestamps()[step]);
        assert!(view.window("TEST", step + 2).is_none());
    }
}

fn decisions(config: &StrategyConfig, s: &MarketDataSeries, steps: usize) -> Vec<Vec<Order>> {
    let mut strategy = config.build().unwrap();
    let mut positions: BTreeMap<String, Position> = BTreeMap::new();
    let mut out = Vec::new();
    for step in 0..steps {
        let orders = strategy.decide(&s.history(step).unwrap(), &positions).unwrap();
        // Track positions as if every order filled at the close.
        for order in &orders {
            let close = s.cross_section(step).unwrap().close(&order.instrument).unwrap();
            let qty = positions.get(&order.instrument).map(|p| p.quantity).unwrap_or(0.0) + order.quantity;
            if qty.abs() < 1e-9 {
                positions.remove(&order.instrument);
            } else {
                positions.insert(order.instrument.clone(), Position::new(order.instrument.as_str(), qty, close));
            }
        }
        out.push(orders);
    }
    out
}

#[test]
fn builtin_strategies_agree_on_truncated_and_full_series() {
    let full = series(200);
    let truncated = series(100);
    let configs = [
        StrategyConfig::BuyAndHold {
            sizing: Sizing::Units(1.0),
        },
        StrategyConfig::MovingAverageCrossover {
            fast: 5,
            slow: 20,
            sizing: Sizing::Units(1.0),
        },
        StrategyConfig::MeanReversion {
            lookback: 10,
            entry_z: 1.0,
            exit_z: 0.0,
            sizing: Sizing::Notional(1_000.0),
        },
    ];
    for config in &configs {
        let a = decisions(config, &truncated, 100);
        let b = decisions(config, &full, 100);
        assert_eq!(a, b, "{} leaked future data", config.label());
    }
}
