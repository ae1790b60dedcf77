//! Immutable, aligned market data and the read-only views handed to the
//! engine, strategies and simulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::align::GapPolicy;
use crate::domain::{Bar, Timestamp};

/// Errors raised while building or querying a series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("data alignment failed: {instrument} is missing {missing} of {total} timestamps (first gap at {first_missing})")]
    Alignment {
        instrument: String,
        missing: usize,
        total: usize,
        first_missing: Timestamp,
    },

    #[error("data alignment failed: no instruments supplied")]
    EmptyInput,

    #[error("data alignment failed: {instrument} has no bars")]
    EmptyInstrument { instrument: String },

    #[error("invalid bar for {instrument} at {timestamp}: {reason}")]
    InvalidBar {
        instrument: String,
        timestamp: Timestamp,
        reason: String,
    },

    #[error("non-monotonic timestamps for {instrument}: {previous} followed by {next}")]
    NonMonotonic {
        instrument: String,
        previous: Timestamp,
        next: Timestamp,
    },

    #[error("timestamp {requested} is outside the loaded span [{start}, {end}]")]
    OutOfRange {
        requested: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    #[error("step {step} is outside the series ({len} steps)")]
    StepOutOfRange { step: usize, len: usize },
}

impl SeriesError {
    /// True for the errors that surface before any run (bad or unalignable input).
    pub fn is_alignment_error(&self) -> bool {
        !matches!(
            self,
            SeriesError::OutOfRange { .. } | SeriesError::StepOutOfRange { .. }
        )
    }
}

/// Summary of a series suitable for manifests and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub instruments: Vec<String>,
    pub steps: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub gap_policy: GapPolicy,
    /// Forward-filled bars per instrument (only non-zero entries).
    pub filled_bars: BTreeMap<String, usize>,
    pub content_hash: String,
}

/// Aligned bar data for one or more instruments on a common timestamp grid.
///
/// Built once by [`align`](super::align::align); nothing can mutate it
/// afterwards. Instruments iterate in sorted order.
#[derive(Debug, Clone)]
pub struct MarketDataSeries {
    timestamps: Vec<Timestamp>,
    bars: BTreeMap<String, Vec<Bar>>,
    gap_policy: GapPolicy,
    filled_bars: BTreeMap<String, usize>,
}

impl MarketDataSeries {
    pub(crate) fn from_parts(
        timestamps: Vec<Timestamp>,
        bars: BTreeMap<String, Vec<Bar>>,
        gap_policy: GapPolicy,
        filled_bars: BTreeMap<String, usize>,
    ) -> Self {
        debug_assert!(bars.values().all(|b| b.len() == timestamps.len()));
        Self {
            timestamps,
            bars,
            gap_policy,
            filled_bars,
        }
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Number of steps on the grid.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    pub fn instrument_count(&self) -> usize {
        self.bars.len()
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.bars.contains_key(instrument)
    }

    /// Full bar history for an instrument. Only for post-run tooling; the
    /// engine hands strategies a [`HistoryView`] instead.
    pub fn bars(&self, instrument: &str) -> Option<&[Bar]> {
        self.bars.get(instrument).map(Vec::as_slice)
    }

    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    pub fn filled_bars(&self) -> &BTreeMap<String, usize> {
        &self.filled_bars
    }

    /// First and last grid timestamps.
    pub fn span(&self) -> (Timestamp, Timestamp) {
        (self.timestamps[0], self.timestamps[self.timestamps.len() - 1])
    }

    /// Grid index for a timestamp: exact match, or the latest grid point
    /// before it when it falls between two grid points.
    pub fn index_at(&self, timestamp: Timestamp) -> Result<usize, SeriesError> {
        let (start, end) = self.span();
        if timestamp < start || timestamp > end {
            return Err(SeriesError::OutOfRange {
                requested: timestamp,
                start,
                end,
            });
        }
        match self.timestamps.binary_search(&timestamp) {
            Ok(i) => Ok(i),
            Err(insert_at) => Ok(insert_at - 1),
        }
    }

    /// Aligned cross-section at (or as of) `timestamp`.
    pub fn at(&self, timestamp: Timestamp) -> Result<CrossSection<'_>, SeriesError> {
        let step = self.index_at(timestamp)?;
        self.cross_section(step)
    }

    /// Aligned cross-section at a grid step.
    pub fn cross_section(&self, step: usize) -> Result<CrossSection<'_>, SeriesError> {
        self.check_step(step)?;
        let bars = self
            .bars
            .iter()
            .map(|(instrument, bars)| (instrument.as_str(), &bars[step]))
            .collect();
        Ok(CrossSection {
            step,
            timestamp: self.timestamps[step],
            bars,
        })
    }

    /// History bounded at `step` (inclusive). Later bars are unreachable.
    pub fn history(&self, step: usize) -> Result<HistoryView<'_>, SeriesError> {
        self.check_step(step)?;
        Ok(HistoryView {
            timestamps: &self.timestamps[..=step],
            bars: self
                .bars
                .iter()
                .map(|(instrument, bars)| (instrument.as_str(), &bars[..=step]))
                .collect(),
        })
    }

    /// Deterministic BLAKE3 hash over instruments and every bar field.
    ///
    /// Covers instruments in sorted order, so it is independent of the
    /// order in which the input map was built.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}", self.gap_policy).as_bytes());
        for (instrument, bars) in &self.bars {
            hasher.update(instrument.as_bytes());
            for bar in bars {
                hasher.update(&bar.timestamp.timestamp_millis().to_le_bytes());
                hasher.update(&bar.open.to_le_bytes());
                hasher.update(&bar.high.to_le_bytes());
                hasher.update(&bar.low.to_le_bytes());
                hasher.update(&bar.close.to_le_bytes());
                hasher.update(&bar.volume.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn summary(&self) -> SeriesSummary {
        let (start, end) = self.span();
        SeriesSummary {
            instruments: self.bars.keys().cloned().collect(),
            steps: self.len(),
            start,
            end,
            gap_policy: self.gap_policy,
            filled_bars: self.filled_bars.clone(),
            content_hash: self.content_hash(),
        }
    }

    fn check_step(&self, step: usize) -> Result<(), SeriesError> {
        if step >= self.timestamps.len() {
            return Err(SeriesError::StepOutOfRange {
                step,
                len: self.timestamps.len(),
            });
        }
        Ok(())
    }
}

/// Every instrument's bar at one grid timestamp.
#[derive(Debug, Clone)]
pub struct CrossSection<'a> {
    step: usize,
    timestamp: Timestamp,
    bars: BTreeMap<&'a str, &'a Bar>,
}

impl<'a> CrossSection<'a> {
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn get(&self, instrument: &str) -> Option<&'a Bar> {
        self.bars.get(instrument).copied()
    }

    pub fn close(&self, instrument: &str) -> Option<f64> {
        self.get(instrument).map(|bar| bar.close)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Bar)> + '_ {
        self.bars.iter().map(|(instrument, bar)| (*instrument, *bar))
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Look-back window handed to a strategy at one step.
///
/// Every slice ends at the current step, so bars after it cannot be reached
/// through this type.
#[derive(Debug, Clone)]
pub struct HistoryView<'a> {
    timestamps: &'a [Timestamp],
    bars: BTreeMap<&'a str, &'a [Bar]>,
}

impl<'a> HistoryView<'a> {
    /// Index of the current step.
    pub fn step(&self) -> usize {
        self.timestamps.len() - 1
    }

    /// Timestamp of the current step (the latest visible timestamp).
    pub fn timestamp(&self) -> Timestamp {
        self.timestamps[self.timestamps.len() - 1]
    }

    pub fn timestamps(&self) -> &'a [Timestamp] {
        self.timestamps
    }

    /// Number of visible steps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.bars.keys().copied()
    }

    /// All visible bars for an instrument, oldest first.
    pub fn bars(&self, instrument: &str) -> Option<&'a [Bar]> {
        self.bars.get(instrument).copied()
    }

    /// The current bar for an instrument.
    pub fn latest(&self, instrument: &str) -> Option<&'a Bar> {
        self.bars(instrument).and_then(|bars| bars.last())
    }

    /// The last `n` visible bars, or `None` if fewer than `n` are visible.
    pub fn window(&self, instrument: &str, n: usize) -> Option<&'a [Bar]> {
        let bars = self.bars(instrument)?;
        if n == 0 || bars.len() < n {
            return None;
        }
        Some(&bars[bars.len() - n..])
    }
}
