//! Scripted in-memory venue for exercising the executor and reconciler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;

use crate::api::{ClosedPnl, OpenOrder, OrderRequest, Venue, VenueError};
use crate::models::{Fill, Position, Side};

#[derive(Default)]
pub struct MockVenue {
    pub positions: Mutex<Vec<Position>>,
    pub executions: Mutex<Vec<Fill>>,
    pub closed: Mutex<Vec<ClosedPnl>>,
    pub resting_orders: Mutex<Vec<OpenOrder>>,
    pub equity: Decimal,

    /// Recorded calls.
    pub placed: Mutex<Vec<OrderRequest>>,
    pub stops: Mutex<Vec<(String, u8, Decimal)>>,
    pub leverage_calls: Mutex<Vec<(String, String)>>,
    pub cancelled: Mutex<Vec<(String, String)>>,

    /// When set, the next `place_order` fails with this error.
    pub next_order_error: Mutex<Option<VenueError>>,
    /// Errors returned by successive `set_trading_stop` calls, in order.
    pub stop_errors: Mutex<Vec<VenueError>>,
}

impl MockVenue {
    pub fn with_positions(positions: Vec<Position>) -> Self {
        Self {
            positions: Mutex::new(positions),
            ..Default::default()
        }
    }

    pub fn position_row(
        symbol: &str,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
    ) -> Position {
        Position {
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            leverage: "10".to_string(),
            position_idx: match side {
                Side::Buy => 1,
                Side::Sell => 2,
            },
            stop_loss: None,
        }
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    pub fn applied_stops(&self) -> Vec<(String, u8, Decimal)> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl Venue for MockVenue {
    async fn positions(&self) -> Result<Vec<Position>, VenueError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn position(&self, symbol: &str) -> Result<Vec<Position>, VenueError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn executions(&self, _limit: u32) -> Result<Vec<Fill>, VenueError> {
        Ok(self.executions.lock().unwrap().clone())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        Ok(self.resting_orders.lock().unwrap().clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError> {
        if let Some(err) = self.next_order_error.lock().unwrap().take() {
            return Err(err);
        }
        let mut placed = self.placed.lock().unwrap();
        placed.push(request.clone());
        Ok(format!("mock-order-{}", placed.len()))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        self.cancelled
            .lock()
            .unwrap()
            .push((symbol.to_string(), order_id.to_string()));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: &str) -> Result<(), VenueError> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage.to_string()));
        Ok(())
    }

    async fn set_trading_stop(
        &self,
        symbol: &str,
        position_idx: u8,
        stop_price: Decimal,
    ) -> Result<(), VenueError> {
        let mut errors = self.stop_errors.lock().unwrap();
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }
        self.stops
            .lock()
            .unwrap()
            .push((symbol.to_string(), position_idx, stop_price));
        Ok(())
    }

    async fn closed_pnl(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        _limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError> {
        let start_ms = start.timestamp_millis();
        Ok(self
            .closed
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.created_time_ms >= start_ms)
            .filter(|r| symbol.map_or(true, |s| s == r.symbol))
            .cloned()
            .collect())
    }

    async fn total_equity(&self) -> Result<Decimal, VenueError> {
        Ok(self.equity)
    }
}
