//! Abstract trading-venue capability consumed by the replication engine.
//!
//! The engine never talks HTTP directly; it goes through this trait so the
//! executor and reconciler can be exercised against a scripted venue in
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{Fill, Position};

use super::error::VenueError;
use super::types::{ClosedPnl, OpenOrder, OrderRequest};

#[async_trait]
pub trait Venue: Send + Sync {
    /// All open positions (linear, USDT-settled), including zero-size rows
    /// the venue may report; callers filter on `size > 0`.
    async fn positions(&self) -> Result<Vec<Position>, VenueError>;

    /// Open position rows for a single symbol.
    async fn position(&self, symbol: &str) -> Result<Vec<Position>, VenueError>;

    /// Most recent executions, newest first.
    async fn executions(&self, limit: u32) -> Result<Vec<Fill>, VenueError>;

    /// Resting orders on the account.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError>;

    /// Place a market order; returns the venue order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError>;

    /// Mirror the given leverage onto the symbol (both buy and sell legs).
    async fn set_leverage(&self, symbol: &str, leverage: &str) -> Result<(), VenueError>;

    /// Apply a full-position protective stop.
    async fn set_trading_stop(
        &self,
        symbol: &str,
        position_idx: u8,
        stop_price: Decimal,
    ) -> Result<(), VenueError>;

    /// Closed-PnL history since `start`, optionally per symbol, newest first.
    async fn closed_pnl(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError>;

    /// Total account equity, for the status report.
    async fn total_equity(&self) -> Result<Decimal, VenueError>;
}
