//! Buy-and-hold: one sized buy per instrument, then hold to the end.

use std::collections::{BTreeMap, BTreeSet};

use crate::data::HistoryView;
use crate::domain::{Order, Position};

use super::{Sizing, Strategy, StrategyError};

#[derive(Debug, Clone)]
pub struct BuyAndHold {
    sizing: Sizing,
    entered: BTreeSet<String>,
}

impl BuyAndHold {
    pub fn new(sizing: Sizing) -> Result<Self, StrategyError> {
        sizing.validate()?;
        Ok(Self {
            sizing,
            entered: BTreeSet::new(),
        })
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn decide(
        &mut self,
        history: &HistoryView<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> Result<Vec<Order>, StrategyError> {
        let mut orders = Vec::new();
        for instrument in history.instruments() {
            if self.entered.contains(instrument) {
                continue;
            }
            let Some(bar) = history.latest(instrument) else {
                continue;
            };
            // Marked as entered even when the order is later rejected.
            self.entered.insert(instrument.to_string());
            let quantity = self.sizing.quantity(bar.close);
            if quantity > 0.0 {
                orders.push(Order::market(instrument, quantity, history.timestamp()));
            }
        }
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{align, GapPolicy};
    use crate::domain::Bar;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn buys_once_per_instrument() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = |c: f64| -> Vec<Bar> {
            (0..3)
                .map(|i| Bar::new(t0 + Duration::days(i), c, c, c, c, 100.0))
                .collect()
        };
        let series = align(
            vec![("AAA".to_string(), bars(50.0)), ("BBB".to_string(), bars(200.0))],
            GapPolicy::RejectGap,
        )
        .unwrap();

        let mut strategy = BuyAndHold::new(Sizing::Notional(1_000.0)).unwrap();
        let positions = BTreeMap::new();
        let first = strategy.decide(&series.history(0).unwrap(), &positions).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].instrument, "AAA");
        assert_eq!(first[0].quantity, 20.0);
        assert_eq!(first[1].quantity, 5.0);
        assert_eq!(first[0].issued_at, t0);

        let second = strategy.decide(&series.history(1).unwrap(), &positions).unwrap();
        assert!(second.is_empty());
    }
}
