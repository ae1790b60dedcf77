//! Post-run performance analysis.

pub mod metrics;

pub use metrics::{AnalyzerConfig, MaxDrawdown, MetricValue, Metrics, PerformanceAnalyzer};
