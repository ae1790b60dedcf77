//! Idle strategy: never trades. Baseline for a flat equity curve.

use std::collections::BTreeMap;

use crate::data::HistoryView;
use crate::domain::{Order, Position};

use super::{Strategy, StrategyError};

#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Strategy for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    fn decide(
        &mut self,
        _history: &HistoryView<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError> {
        Ok(Vec::new())
    }
}
