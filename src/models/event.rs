//! Domain events handed to the notification collaborator.
//!
//! One event per completed state-changing action. The notification process
//! reads these from the event log and renders human-readable summaries; the
//! core only produces them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Close,
    SlSet,
    /// No stop-loss tier produced a positive price; the position is live
    /// without protection and the operator has to see it.
    Unprotected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,

    /// Realized PnL of the closed trade, when the venue had it available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,

    /// Closed PnL since UTC midnight, queried fresh from the venue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_pnl: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_increase: Option<bool>,

    /// Protective price that was applied, for `sl_set` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,

    pub at: DateTime<Utc>,
}

impl CopyEvent {
    pub fn open(symbol: &str, side: Side, qty: Decimal, is_increase: bool) -> Self {
        Self {
            kind: EventKind::Open,
            symbol: symbol.to_string(),
            side,
            qty,
            pnl: None,
            daily_pnl: None,
            is_increase: Some(is_increase),
            stop_price: None,
            at: Utc::now(),
        }
    }

    pub fn close(
        symbol: &str,
        side: Side,
        qty: Decimal,
        pnl: Option<Decimal>,
        daily_pnl: Option<Decimal>,
    ) -> Self {
        Self {
            kind: EventKind::Close,
            symbol: symbol.to_string(),
            side,
            qty,
            pnl,
            daily_pnl,
            is_increase: None,
            stop_price: None,
            at: Utc::now(),
        }
    }

    pub fn sl_set(symbol: &str, side: Side, qty: Decimal, stop_price: Decimal) -> Self {
        Self {
            kind: EventKind::SlSet,
            symbol: symbol.to_string(),
            side,
            qty,
            pnl: None,
            daily_pnl: None,
            is_increase: None,
            stop_price: Some(stop_price),
            at: Utc::now(),
        }
    }

    pub fn unprotected(symbol: &str, side: Side, qty: Decimal) -> Self {
        Self {
            kind: EventKind::Unprotected,
            symbol: symbol.to_string(),
            side,
            qty,
            pnl: None,
            daily_pnl: None,
            is_increase: None,
            stop_price: None,
            at: Utc::now(),
        }
    }
}
