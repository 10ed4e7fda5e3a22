//! Bybit V5 wire types.
//!
//! The venue reports all numerics as strings; conversion into `Decimal`
//! happens at the client boundary so the rest of the engine never sees raw
//! strings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Envelope every V5 endpoint wraps its payload in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// Paginated list payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub symbol: String,
    pub side: String,
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub leverage: String,
    #[serde(default)]
    pub position_idx: u8,
    #[serde(default)]
    pub stop_loss: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
    pub symbol: String,
    pub side: String,
    pub exec_id: String,
    pub exec_qty: String,
    #[serde(default)]
    pub closed_size: String,
    #[serde(default)]
    pub exec_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub symbol: String,
    pub order_id: String,
    pub side: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub order_status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPnlData {
    pub symbol: String,
    #[serde(default)]
    pub closed_pnl: String,
    #[serde(default)]
    pub created_time: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletData {
    #[serde(default)]
    pub total_equity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    #[serde(default)]
    pub order_id: String,
}

/// A resting order on the destination, surfaced so `close-all` can cancel
/// before flattening.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: String,
}

/// One record from the closed-PnL history.
#[derive(Debug, Clone)]
pub struct ClosedPnl {
    pub symbol: String,
    pub closed_pnl: Decimal,
    pub created_time_ms: i64,
}

/// Market order request sent to the destination account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: &'static str,
    pub symbol: String,
    pub side: String,
    pub order_type: &'static str,
    pub qty: String,
    pub reduce_only: bool,
    pub position_idx: u8,
    pub order_link_id: String,
}

impl OrderRequest {
    pub fn market(
        symbol: &str,
        side: crate::models::Side,
        qty: Decimal,
        reduce_only: bool,
        position_idx: u8,
    ) -> Self {
        Self {
            category: "linear",
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            order_type: "Market",
            qty: qty.normalize().to_string(),
            reduce_only,
            position_idx,
            order_link_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Parse a venue numeric string, treating empty as absent.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}
