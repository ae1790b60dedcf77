//! Rolling statistics over close prices.
//!
//! Computed on demand from the visible window, so a value at step `t` can
//! only depend on bars `0..=t`.

use crate::domain::Bar;

/// Simple moving average of the closes in `window`.
pub fn sma(window: &[Bar]) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().map(|b| b.close).sum::<f64>() / window.len() as f64)
}

/// Mean and sample standard deviation of the closes in `window`.
/// Needs at least two bars.
pub fn mean_std(window: &[Bar]) -> Option<(f64, f64)> {
    if window.len() < 2 {
        return None;
    }
    let mean = sma(window)?;
    let var = window
        .iter()
        .map(|b| (b.close - mean).powi(2))
        .sum::<f64>()
        / (window.len() - 1) as f64;
    Some((mean, var.sqrt()))
}

/// z-score of the latest close against the window's mean and std.
/// `None` when the window is flat.
pub fn zscore(window: &[Bar]) -> Option<f64> {
    let (mean, std) = mean_std(window)?;
    let last = window.last()?.close;
    if std <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    Some((last - mean) / std)
}
