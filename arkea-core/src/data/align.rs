//! Multi-instrument time alignment.
//!
//! Given bars for several instruments, put them on one common timestamp grid
//! (the union of all timestamps) and resolve gaps with an explicit policy.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::series::{MarketDataSeries, SeriesError};
use crate::domain::{Bar, Timestamp};

/// How to treat an instrument that has no bar at some grid timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapPolicy {
    /// Carry the previous close forward as a flat, zero-volume bar.
    /// The grid starts where every instrument has data.
    ForwardFill,
    /// Fail alignment on the first gap.
    #[default]
    RejectGap,
    /// Remove instruments until the rest share a gap-free grid. An
    /// instrument with extra timestamps the others lack counts as the gap.
    DropInstrumentOnGap,
}

/// Align per-instrument bar sequences onto a common grid.
///
/// Every input sequence must be non-empty, sane, and strictly increasing in
/// time; otherwise alignment fails before any gap handling happens.
pub fn align<I>(series_per_instrument: I, policy: GapPolicy) -> Result<MarketDataSeries, SeriesError>
where
    I: IntoIterator<Item = (String, Vec<Bar>)>,
{
    let input: BTreeMap<String, Vec<Bar>> = series_per_instrument.into_iter().collect();
    if input.is_empty() {
        return Err(SeriesError::EmptyInput);
    }
    for (instrument, bars) in &input {
        validate_instrument(instrument, bars)?;
    }

    let grid = union_grid(input.values());

    let series = match policy {
        GapPolicy::RejectGap => {
            for (instrument, bars) in &input {
                if let Some(err) = gap_error(instrument, bars, &grid) {
                    return Err(err);
                }
            }
            MarketDataSeries::from_parts(grid, input, policy, BTreeMap::new())
        }
        GapPolicy::DropInstrumentOnGap => {
            let survivors = gap_free_subset(&input);
            let (complete, dropped): (BTreeMap<_, _>, BTreeMap<_, _>) = input
                .into_iter()
                .partition(|(instrument, _)| survivors.contains(instrument));
            for (instrument, bars) in &dropped {
                warn!(
                    instrument = %instrument,
                    bars = bars.len(),
                    missing = grid.len() - bars.len(),
                    "dropping instrument with gaps"
                );
            }
            let grid = union_grid(complete.values());
            MarketDataSeries::from_parts(grid, complete, policy, BTreeMap::new())
        }
        GapPolicy::ForwardFill => forward_fill(input, grid),
    };

    debug!(
        instruments = series.instrument_count(),
        steps = series.len(),
        ?policy,
        "aligned market data"
    );
    Ok(series)
}

fn union_grid<'a>(series: impl Iterator<Item = &'a Vec<Bar>>) -> Vec<Timestamp> {
    series
        .flat_map(|bars| bars.iter().map(|b| b.timestamp))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Bars missing from `members` against the union of their own timestamps.
fn missing_bars(input: &BTreeMap<String, Vec<Bar>>, members: &BTreeSet<&str>) -> usize {
    let grid = union_grid(members.iter().map(|m| &input[*m]));
    members.iter().map(|m| grid.len() - input[*m].len()).sum()
}

/// Greedily drop instruments until the survivors share one gap-free grid.
///
/// Each round removes the instrument whose removal leaves the fewest
/// missing bars among the rest; ties drop the shorter history, then the
/// later name. A single instrument is always gap-free, so at least one
/// survives.
fn gap_free_subset(input: &BTreeMap<String, Vec<Bar>>) -> BTreeSet<String> {
    let mut survivors: BTreeSet<&str> = input.keys().map(String::as_str).collect();
    while missing_bars(input, &survivors) > 0 {
        let victim = survivors.iter().copied().min_by_key(|candidate| {
            let rest: BTreeSet<&str> = survivors
                .iter()
                .copied()
                .filter(|s| s != candidate)
                .collect();
            (missing_bars(input, &rest), input[*candidate].len(), Reverse(*candidate))
        });
        match victim {
            Some(victim) => survivors.remove(victim),
            None => break,
        };
    }
    survivors.into_iter().map(str::to_string).collect()
}

fn validate_instrument(instrument: &str, bars: &[Bar]) -> Result<(), SeriesError> {
    if bars.is_empty() {
        return Err(SeriesError::EmptyInstrument {
            instrument: instrument.to_string(),
        });
    }
    for bar in bars {
        if !bar.is_sane() {
            let reason = if bar.is_void() {
                "non-finite field".to_string()
            } else {
                format!(
                    "inconsistent OHLCV (o={} h={} l={} c={} v={})",
                    bar.open, bar.high, bar.low, bar.close, bar.volume
                )
            };
            return Err(SeriesError::InvalidBar {
                instrument: instrument.to_string(),
                timestamp: bar.timestamp,
                reason,
            });
        }
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(SeriesError::NonMonotonic {
                instrument: instrument.to_string(),
                previous: pair[0].timestamp,
                next: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

/// Describe the first gap of `bars` against `grid`, if any.
fn gap_error(instrument: &str, bars: &[Bar], grid: &[Timestamp]) -> Option<SeriesError> {
    if bars.len() == grid.len() {
        return None;
    }
    let mut cursor = bars.iter().peekable();
    let first_missing = grid.iter().copied().find(|ts| match cursor.peek() {
        Some(bar) if bar.timestamp == *ts => {
            cursor.next();
            false
        }
        _ => true,
    })?;
    Some(SeriesError::Alignment {
        instrument: instrument.to_string(),
        missing: grid.len() - bars.len(),
        total: grid.len(),
        first_missing,
    })
}

fn forward_fill(input: BTreeMap<String, Vec<Bar>>, grid: Vec<Timestamp>) -> MarketDataSeries {
    // Leading gaps have nothing to carry; start where every instrument has data.
    let start = input
        .values()
        .map(|bars| bars[0].timestamp)
        .max()
        .unwrap_or(grid[0]);
    let grid: Vec<Timestamp> = grid.into_iter().filter(|ts| *ts >= start).collect();

    let mut aligned = BTreeMap::new();
    let mut filled_bars = BTreeMap::new();
    for (instrument, bars) in input {
        let trimmed = bars.iter().take_while(|b| b.timestamp < start).count();
        if trimmed > 0 {
            info!(instrument = %instrument, trimmed, %start, "trimmed bars before common start");
        }
        let mut source = bars.into_iter().skip(trimmed).peekable();
        let mut last: Option<Bar> = None;
        let mut filled = 0usize;
        let mut out = Vec::with_capacity(grid.len());
        for &ts in &grid {
            let bar = match source.peek() {
                Some(bar) if bar.timestamp == ts => source.next(),
                _ => None,
            };
            let bar = match bar {
                Some(bar) => bar,
                None => {
                    filled += 1;
                    // `last` is always set: the first grid point is `start`,
                    // where every instrument has a real bar.
                    let prev_close = last.as_ref().map(|b| b.close).unwrap_or(f64::NAN);
                    Bar::carried(ts, prev_close)
                }
            };
            last = Some(bar.clone());
            out.push(bar);
        }
        if filled > 0 {
            debug!(instrument = %instrument, filled, "forward-filled gaps");
            filled_bars.insert(instrument.clone(), filled);
        }
        aligned.insert(instrument, out);
    }

    MarketDataSeries::from_parts(grid, aligned, GapPolicy::ForwardFill, filled_bars)
}
