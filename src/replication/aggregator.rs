//! Short-window fill aggregation.
//!
//! Venues split one logical trade into multiple partial fills within
//! milliseconds. Buffering same-intent fills for a few seconds and replaying
//! them as one order avoids a burst of undersized replicas that could fail
//! minimum-notional checks on the destination.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::models::{FillAction, FillIntent, PositionKey, Side};

/// Bucket identity: fills for the same key coalesce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub symbol: String,
    pub side: Side,
    pub action: FillAction,
}

#[derive(Debug)]
struct Bucket {
    total_qty: Decimal,
    first_seen: Instant,
    /// Taken from the first fill; later fills for the same key cannot turn
    /// an increase back into a fresh open.
    is_increase: bool,
    close_side_hint: Option<Side>,
}

/// One drained bucket, ready for the executor.
#[derive(Debug, Clone)]
pub struct AggregatedAction {
    pub symbol: String,
    /// Order side to send on the destination.
    pub side: Side,
    pub action: FillAction,
    pub qty: Decimal,
    pub is_increase: bool,
    /// For CLOSE: the side of the position leg being closed.
    pub close_side_hint: Option<Side>,
}

impl AggregatedAction {
    /// The position leg this action affects.
    pub fn position_key(&self) -> PositionKey {
        let side = match self.action {
            FillAction::Open => self.side,
            FillAction::Close => self.close_side_hint.unwrap_or_else(|| self.side.opposite()),
        };
        PositionKey::new(self.symbol.clone(), side)
    }
}

#[derive(Debug, Default)]
pub struct OrderAggregator {
    pending: HashMap<AggregationKey, Bucket>,
}

impl OrderAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a fill into its bucket, creating it on first sight.
    pub fn add_fill(&mut self, intent: FillIntent) {
        let key = AggregationKey {
            symbol: intent.symbol.clone(),
            side: intent.side,
            action: intent.action,
        };

        let bucket = self.pending.entry(key.clone()).or_insert_with(|| {
            debug!(symbol = %intent.symbol, side = %intent.side, action = intent.action.as_str(), "New aggregation bucket");
            Bucket {
                total_qty: Decimal::ZERO,
                first_seen: Instant::now(),
                is_increase: intent.is_increase,
                close_side_hint: intent.close_side_hint,
            }
        });

        bucket.total_qty += intent.qty;
        info!(
            symbol = %intent.symbol,
            side = %intent.side,
            action = intent.action.as_str(),
            qty = %intent.qty,
            total = %bucket.total_qty,
            "Fill aggregated"
        );
    }

    /// Remove and return every bucket older than the window, each as one
    /// aggregated action.
    pub fn drain_ready(&mut self, window: Duration) -> Vec<AggregatedAction> {
        let ready_keys: Vec<AggregationKey> = self
            .pending
            .iter()
            .filter(|(_, b)| b.first_seen.elapsed() >= window)
            .map(|(k, _)| k.clone())
            .collect();

        let mut actions = Vec::with_capacity(ready_keys.len());
        for key in ready_keys {
            let bucket = self.pending.remove(&key).expect("key collected above");
            info!(
                symbol = %key.symbol,
                side = %key.side,
                action = key.action.as_str(),
                qty = %bucket.total_qty,
                "Aggregated action ready"
            );
            actions.push(AggregatedAction {
                symbol: key.symbol,
                side: key.side,
                action: key.action,
                qty: bucket.total_qty,
                is_increase: bucket.is_increase,
                close_side_hint: bucket.close_side_hint,
            });
        }
        actions
    }

    /// Unresolved buckets, as (position key, action) pairs, for the drift
    /// reconciler to consult without consuming them.
    pub fn peek_pending(&self) -> HashSet<(PositionKey, FillAction)> {
        self.pending
            .iter()
            .map(|(key, bucket)| {
                let side = match key.action {
                    FillAction::Open => key.side,
                    FillAction::Close => {
                        bucket.close_side_hint.unwrap_or_else(|| key.side.opposite())
                    }
                };
                (PositionKey::new(key.symbol.clone(), side), key.action)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_intent(symbol: &str, side: Side, qty: Decimal) -> FillIntent {
        FillIntent {
            symbol: symbol.to_string(),
            side,
            qty,
            action: FillAction::Open,
            is_increase: false,
            close_side_hint: None,
        }
    }

    #[test]
    fn partial_fills_coalesce_into_one_action() {
        let mut agg = OrderAggregator::new();
        agg.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.3)));
        agg.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.2)));

        let actions = agg.drain_ready(Duration::ZERO);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].qty, dec!(0.5));
        assert!(agg.is_empty());
    }

    #[test]
    fn accumulation_is_order_independent() {
        let mut a = OrderAggregator::new();
        a.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.1)));
        a.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.7)));

        let mut b = OrderAggregator::new();
        b.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.7)));
        b.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.1)));

        assert_eq!(
            a.drain_ready(Duration::ZERO)[0].qty,
            b.drain_ready(Duration::ZERO)[0].qty
        );
    }

    #[test]
    fn distinct_keys_stay_separate() {
        let mut agg = OrderAggregator::new();
        agg.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(1)));
        agg.add_fill(open_intent("BTCUSDT", Side::Sell, dec!(2)));
        agg.add_fill(open_intent("ETHUSDT", Side::Buy, dec!(3)));

        let actions = agg.drain_ready(Duration::ZERO);
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn young_buckets_are_not_drained() {
        let mut agg = OrderAggregator::new();
        agg.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(1)));

        let actions = agg.drain_ready(Duration::from_secs(60));
        assert!(actions.is_empty());
        assert!(!agg.is_empty());
    }

    #[test]
    fn peek_pending_maps_close_to_position_side() {
        let mut agg = OrderAggregator::new();
        agg.add_fill(FillIntent {
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell, // closing order side
            qty: dec!(1),
            action: FillAction::Close,
            is_increase: false,
            close_side_hint: Some(Side::Buy),
        });

        let pending = agg.peek_pending();
        assert!(pending.contains(&(PositionKey::new("BTCUSDT", Side::Buy), FillAction::Close)));
        // Peeking does not consume.
        assert!(!agg.is_empty());
    }

    #[test]
    fn first_fill_pins_increase_flag() {
        let mut agg = OrderAggregator::new();
        let mut first = open_intent("BTCUSDT", Side::Buy, dec!(0.3));
        first.is_increase = true;
        agg.add_fill(first);
        agg.add_fill(open_intent("BTCUSDT", Side::Buy, dec!(0.2)));

        let actions = agg.drain_ready(Duration::ZERO);
        assert!(actions[0].is_increase);
    }
}
