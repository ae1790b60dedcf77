//! Layered config loading from files, plus merge properties.

use std::path::{Path, PathBuf};

use proptest::prelude::*;

use arkea_core::data::GapPolicy;
use arkea_core::strategy::{Sizing, StrategyConfig};
use arkea_runner::config::{merge_values, BacktestConfig, ConfigError};

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn later_layers_win_and_tables_merge() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(
        dir.path(),
        "base.toml",
        r#"
[backtest]
starting_cash = 25000.0

[data]
instruments = ["SPY"]
gap_policy = "forward-fill"

[strategy]
kind = "mean_reversion"
lookback = 20
entry_z = 2.0
exit_z = 0.0
sizing = { units = 5.0 }
"#,
    );
    let universe = write(dir.path(), "universe.toml", "[data]\ninstruments = [\"QQQ\", \"IWM\"]\n");
    let tuned = write(dir.path(), "tuned.toml", "[strategy]\nentry_z = 1.5\n");

    let config = BacktestConfig::load_layered(&[base, universe, tuned]).unwrap();
    assert_eq!(config.backtest.starting_cash, 25_000.0);
    // arrays replace, they do not concatenate
    assert_eq!(config.data.instruments, vec!["QQQ", "IWM"]);
    assert_eq!(config.data.gap_policy, GapPolicy::ForwardFill);
    assert_eq!(
        config.strategy,
        StrategyConfig::MeanReversion {
            lookback: 20,
            entry_z: 1.5,
            exit_z: 0.0,
            sizing: Sizing::Units(5.0),
        }
    );
}

#[test]
fn missing_and_malformed_layers() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        BacktestConfig::load(&missing),
        Err(ConfigError::NotFound(p)) if p == missing
    ));
    assert!(matches!(
        BacktestConfig::load_layered(&[]),
        Err(ConfigError::NoLayers)
    ));

    let broken = write(dir.path(), "broken.toml", "[backtest\nstarting_cash = 1\n");
    let err = BacktestConfig::load(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn validation_runs_after_merge() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(dir.path(), "base.toml", "[execution]\nslippage_bps = 5.0\n");
    let bad = write(dir.path(), "bad.toml", "[execution]\nslippage_bps = -3.0\n");
    assert!(matches!(
        BacktestConfig::load_layered(&[base, bad]),
        Err(ConfigError::Invalid(_))
    ));
}

proptest! {
    /// Overlay leaves win; sibling keys in the base survive.
    #[test]
    fn merge_overrides_only_named_leaves(
        base_slip in 0.0..100.0_f64,
        base_fee in 0.0..100.0_f64,
        overlay_slip in 0.0..100.0_f64,
        cash in 1.0..1e7_f64,
    ) {
        let mut merged: toml::Value = toml::from_str(&format!(
            "[backtest]\nstarting_cash = {cash:?}\n[execution]\nslippage_bps = {base_slip:?}\nfee_bps = {base_fee:?}\n"
        )).unwrap();
        let overlay: toml::Value =
            toml::from_str(&format!("[execution]\nslippage_bps = {overlay_slip:?}\n")).unwrap();
        merge_values(&mut merged, overlay);

        let config: BacktestConfig = merged.try_into().unwrap();
        prop_assert_eq!(config.execution.slippage_bps, overlay_slip);
        prop_assert_eq!(config.execution.fee_bps, base_fee);
        prop_assert_eq!(config.backtest.starting_cash, cash);
    }

    /// Equal configs hash equal; the id is a 64-char hex string.
    #[test]
    fn run_id_depends_only_on_content(fast in 1usize..50, extra in 1usize..50) {
        let config = BacktestConfig::default().with_strategy(StrategyConfig::MovingAverageCrossover {
            fast,
            slow: fast + extra,
            sizing: Sizing::Units(1.0),
        });
        let a = config.run_id().unwrap().to_hex();
        let b = config.clone().run_id().unwrap().to_hex();
        prop_assert_eq!(a.len(), 64);
        prop_assert_eq!(a, b);
    }
}
