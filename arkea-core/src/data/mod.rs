//! Market data: alignment onto a common grid, and the immutable series with
//! its cross-section and history views.

pub mod align;
pub mod series;

pub use align::{align, GapPolicy};
pub use series::{CrossSection, HistoryView, MarketDataSeries, SeriesError, SeriesSummary};
