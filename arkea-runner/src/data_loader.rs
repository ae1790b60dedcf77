//! Bar loading and dataset preparation for the runner.
//!
//! A dataset is a directory of per-instrument CSV files
//! (`<INSTRUMENT>.csv`, header `timestamp,open,high,low,close,volume`) plus
//! an optional `manifest.json` describing the aligned result. `build-data`
//! produces such a directory either from raw CSVs or from the seeded
//! synthetic generator; backtests load it back through [`load_series`].
//!
//! Rows whose price and volume fields are all empty (or NaN) are dropped.
//! A row with only some fields missing is an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use arkea_core::data::{align, GapPolicy, MarketDataSeries, SeriesError};
use arkea_core::domain::{Bar, Timestamp};
use arkea_core::rng::SeedHierarchy;

/// File name of the dataset manifest inside a data directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Bumped when the manifest layout changes.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("no data file for instrument '{instrument}' in {}", dir.display())]
    MissingInstrument { instrument: String, dir: PathBuf },

    #[error("no instrument CSV files found in {}", .0.display())]
    NoData(PathBuf),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("invalid manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },
}

/// One CSV row. Every field is optional so empty cells can be told apart
/// from malformed ones.
#[derive(Debug, Serialize, Deserialize)]
struct BarRecord {
    timestamp: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl From<&Bar> for BarRecord {
    fn from(bar: &Bar) -> Self {
        Self {
            timestamp: bar.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: Some(bar.close),
            volume: Some(bar.volume),
        }
    }
}

/// Describes an aligned dataset written by `build-data`.
///
/// Carries no wall-clock time, so rebuilding the same input yields a
/// byte-identical manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub schema_version: u32,
    pub instruments: Vec<String>,
    pub steps: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub gap_policy: GapPolicy,
    /// Forward-filled bars per instrument (only non-zero entries).
    pub filled_bars: BTreeMap<String, usize>,
    /// Empty rows dropped while reading the source files.
    pub dropped_rows: usize,
    pub content_hash: String,
    /// True when the bars came from the synthetic generator.
    pub synthetic: bool,
}

impl DatasetManifest {
    fn describe(series: &MarketDataSeries, dropped_rows: usize, synthetic: bool) -> Self {
        let summary = series.summary();
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            instruments: summary.instruments,
            steps: summary.steps,
            start: summary.start,
            end: summary.end,
            gap_policy: summary.gap_policy,
            filled_bars: summary.filled_bars,
            dropped_rows,
            content_hash: summary.content_hash,
            synthetic,
        }
    }
}

/// Aligned data ready for the engine, with provenance.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub series: Arc<MarketDataSeries>,
    /// BLAKE3 content hash of the aligned series.
    pub dataset_hash: String,
    pub dropped_rows: usize,
    /// Manifest found next to the CSV files, if any.
    pub manifest: Option<DatasetManifest>,
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

/// Read one instrument's CSV. Returns the bars in file order and the number
/// of empty rows dropped.
pub fn read_instrument_csv(path: &Path) -> Result<(Vec<Bar>, usize), LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut bars = Vec::new();
    let mut dropped = 0;
    for (index, record) in reader.deserialize::<BarRecord>().enumerate() {
        let record = record.map_err(csv_err)?;
        // header is line 1
        let line = index as u64 + 2;
        let parse_err = |message: String| LoadError::Parse {
            path: path.to_path_buf(),
            line,
            message,
        };

        let timestamp = parse_timestamp(&record.timestamp)
            .ok_or_else(|| parse_err(format!("unparseable timestamp '{}'", record.timestamp)))?;
        let fields = [
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        ]
        .map(|v| v.filter(|x| !x.is_nan()));

        match fields {
            [None, None, None, None, None] => dropped += 1,
            [Some(open), Some(high), Some(low), Some(close), Some(volume)] => {
                bars.push(Bar::new(timestamp, open, high, low, close, volume));
            }
            _ => return Err(parse_err("row has some but not all fields missing".to_string())),
        }
    }
    if dropped > 0 {
        tracing::debug!(path = %path.display(), dropped, "dropped empty rows");
    }
    Ok((bars, dropped))
}

/// Write one instrument's bars as CSV.
pub fn write_instrument_csv(path: &Path, bars: &[Bar]) -> Result<(), LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for bar in bars {
        writer.serialize(BarRecord::from(bar)).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Instrument names of every `*.csv` file in `dir`, sorted.
pub fn discover_instruments(dir: &Path) -> Result<Vec<String>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut instruments = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            instruments.push(stem.to_string());
        }
    }
    instruments.sort();
    if instruments.is_empty() {
        return Err(LoadError::NoData(dir.to_path_buf()));
    }
    Ok(instruments)
}

/// Read raw, unaligned bars for `instruments` (every CSV in `dir` when
/// empty). Returns the bars and the total number of dropped rows.
pub fn load_raw(
    dir: &Path,
    instruments: &[String],
) -> Result<(BTreeMap<String, Vec<Bar>>, usize), LoadError> {
    let instruments = if instruments.is_empty() {
        discover_instruments(dir)?
    } else {
        instruments.to_vec()
    };

    let mut raw = BTreeMap::new();
    let mut dropped = 0;
    for instrument in instruments {
        let path = dir.join(format!("{instrument}.csv"));
        if !path.is_file() {
            return Err(LoadError::MissingInstrument {
                instrument,
                dir: dir.to_path_buf(),
            });
        }
        let (bars, n) = read_instrument_csv(&path)?;
        dropped += n;
        raw.insert(instrument, bars);
    }
    Ok((raw, dropped))
}

/// Load and align a dataset directory.
///
/// When a manifest is present and describes the same instruments and gap
/// policy, its content hash is compared against the loaded data; a
/// mismatch is logged, not fatal.
pub fn load_series(
    dir: &Path,
    instruments: &[String],
    gap_policy: GapPolicy,
) -> Result<LoadedData, LoadError> {
    let (raw, dropped_rows) = load_raw(dir, instruments)?;
    let series = align(raw, gap_policy)?;
    let dataset_hash = series.content_hash();
    let manifest = read_manifest(dir)?;

    if let Some(m) = &manifest {
        let same_scope = m.gap_policy == gap_policy
            && m.instruments.iter().map(String::as_str).eq(series.instruments());
        if same_scope && m.content_hash != dataset_hash {
            tracing::warn!(
                dir = %dir.display(),
                expected = %m.content_hash,
                actual = %dataset_hash,
                "dataset content does not match its manifest"
            );
        }
    }

    tracing::info!(
        dir = %dir.display(),
        instruments = series.instrument_count(),
        steps = series.len(),
        dropped_rows,
        hash = %&dataset_hash[..12],
        "dataset loaded"
    );
    Ok(LoadedData {
        series: Arc::new(series),
        dataset_hash,
        dropped_rows,
        manifest,
    })
}

/// Read `manifest.json` from a data directory, if present.
pub fn read_manifest(dir: &Path) -> Result<Option<DatasetManifest>, LoadError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    let manifest: DatasetManifest =
        serde_json::from_str(&text).map_err(|e| LoadError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
    if manifest.schema_version > MANIFEST_SCHEMA_VERSION {
        return Err(LoadError::Manifest {
            path,
            message: format!(
                "schema version {} is newer than supported version {}",
                manifest.schema_version, MANIFEST_SCHEMA_VERSION
            ),
        });
    }
    Ok(Some(manifest))
}

/// Write an aligned series as a dataset directory (one CSV per instrument
/// plus `manifest.json`).
pub fn write_dataset(
    series: &MarketDataSeries,
    output_dir: &Path,
    dropped_rows: usize,
    synthetic: bool,
) -> Result<DatasetManifest, LoadError> {
    std::fs::create_dir_all(output_dir).map_err(|source| LoadError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    for instrument in series.instruments() {
        let bars = series.bars(instrument).unwrap_or_default();
        write_instrument_csv(&output_dir.join(format!("{instrument}.csv")), bars)?;
    }

    let manifest = DatasetManifest::describe(series, dropped_rows, synthetic);
    let path = output_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest).map_err(|e| LoadError::Manifest {
        path: path.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&path, json).map_err(|source| LoadError::Io { path, source })?;
    Ok(manifest)
}

/// Clean and align raw CSVs from `input_dir` into `output_dir`.
pub fn build_dataset(
    input_dir: &Path,
    instruments: &[String],
    gap_policy: GapPolicy,
    output_dir: &Path,
) -> Result<DatasetManifest, LoadError> {
    let (raw, dropped_rows) = load_raw(input_dir, instruments)?;
    let series = align(raw, gap_policy)?;
    let manifest = write_dataset(&series, output_dir, dropped_rows, false)?;
    tracing::info!(
        input = %input_dir.display(),
        output = %output_dir.display(),
        instruments = manifest.instruments.len(),
        steps = manifest.steps,
        "dataset built"
    );
    Ok(manifest)
}

/// Parameters of the synthetic bar generator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub seed: u64,
    pub instruments: Vec<String>,
    pub start: NaiveDate,
    /// Number of weekday bars per instrument.
    pub days: usize,
}

/// Seeded random-walk bars on a weekday calendar. Each instrument draws
/// from its own sub-seed, so adding an instrument leaves the others
/// unchanged.
pub fn generate_synthetic(spec: &SyntheticSpec) -> BTreeMap<String, Vec<Bar>> {
    let seeds = SeedHierarchy::new(spec.seed);
    spec.instruments
        .iter()
        .map(|instrument| {
            let mut rng = seeds.rng_for("synthetic", instrument);
            let mut bars = Vec::with_capacity(spec.days);
            let mut price = 100.0_f64;
            let mut date = spec.start;
            while bars.len() < spec.days {
                let weekday = date.weekday();
                if weekday != chrono::Weekday::Sat && weekday != chrono::Weekday::Sun {
                    let daily_return: f64 = rng.gen_range(-0.03..0.03);
                    let open = price;
                    let close = price * (1.0 + daily_return);
                    let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                    let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
                    let volume = rng.gen_range(500_000..5_000_000u64) as f64;
                    if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                        let ts = Utc.from_utc_datetime(&midnight);
                        bars.push(Bar::new(ts, open, high, low, close, volume));
                    }
                    price = close;
                }
                date += Duration::days(1);
            }
            (instrument.clone(), bars)
        })
        .collect()
}

/// Generate a synthetic dataset into `output_dir`.
pub fn build_synthetic_dataset(
    spec: &SyntheticSpec,
    output_dir: &Path,
) -> Result<DatasetManifest, LoadError> {
    let series = align(generate_synthetic(spec), GapPolicy::RejectGap)?;
    let manifest = write_dataset(&series, output_dir, 0, true)?;
    tracing::info!(
        seed = spec.seed,
        output = %output_dir.display(),
        instruments = manifest.instruments.len(),
        steps = manifest.steps,
        "synthetic dataset built"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_date_and_rfc3339() {
        let a = parse_timestamp("2024-01-02").unwrap();
        let b = parse_timestamp("2024-01-02T00:00:00Z").unwrap();
        let c = parse_timestamp("2024-01-02T01:00:00+01:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("02/01/2024").is_none());
    }

    #[test]
    fn empty_rows_dropped_partial_rows_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write(
            dir.path(),
            "AAA.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10.5,100\n\
             2024-01-03,,,,,\n\
             2024-01-04,NaN,NaN,NaN,NaN,NaN\n\
             2024-01-05,10.5,12,10,11,200\n",
        );
        let (bars, dropped) = read_instrument_csv(&ok).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(dropped, 2);
        assert_eq!(bars[1].close, 11.0);

        let bad = write(
            dir.path(),
            "BBB.csv",
            "timestamp,open,high,low,close,volume\n2024-01-02,10,11,,10.5,100\n",
        );
        let err = read_instrument_csv(&bad).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn csv_roundtrip_preserves_bars() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticSpec {
            seed: 7,
            instruments: vec!["AAA".to_string()],
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            days: 20,
        };
        let bars = &generate_synthetic(&spec)["AAA"];
        let path = dir.path().join("AAA.csv");
        write_instrument_csv(&path, bars).unwrap();
        let (back, dropped) = read_instrument_csv(&path).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(&back, bars);
    }

    #[test]
    fn missing_instrument_and_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_instruments(dir.path()),
            Err(LoadError::NoData(_))
        ));
        assert!(matches!(
            load_raw(dir.path(), &["SPY".to_string()]),
            Err(LoadError::MissingInstrument { .. })
        ));
    }

    #[test]
    fn synthetic_is_seeded_and_skips_weekends() {
        let spec = SyntheticSpec {
            seed: 42,
            instruments: vec!["AAA".to_string(), "BBB".to_string()],
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            days: 30,
        };
        let a = generate_synthetic(&spec);
        let b = generate_synthetic(&spec);
        assert_eq!(a, b);
        assert_ne!(a["AAA"], a["BBB"]);
        for bars in a.values() {
            assert_eq!(bars.len(), 30);
            assert!(bars.iter().all(|bar| bar.is_sane()));
            assert!(bars.iter().all(|bar| {
                let wd = bar.timestamp.weekday();
                wd != chrono::Weekday::Sat && wd != chrono::Weekday::Sun
            }));
        }

        let mut more = spec.clone();
        more.instruments.push("CCC".to_string());
        assert_eq!(generate_synthetic(&more)["AAA"], a["AAA"]);
    }

    #[test]
    fn built_dataset_loads_with_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticSpec {
            seed: 1,
            instruments: vec!["AAA".to_string(), "BBB".to_string()],
            start: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            days: 15,
        };
        let manifest = build_synthetic_dataset(&spec, dir.path()).unwrap();
        assert!(manifest.synthetic);
        assert_eq!(manifest.steps, 15);

        let loaded = load_series(dir.path(), &[], GapPolicy::RejectGap).unwrap();
        assert_eq!(loaded.dataset_hash, manifest.content_hash);
        assert_eq!(loaded.manifest, Some(manifest));
    }
}
