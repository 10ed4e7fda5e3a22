//! Signed Bybit V5 REST client.
//!
//! Authentication follows the V5 scheme: every request carries
//! `X-BAPI-*` headers and an HMAC-SHA256 signature over
//! `timestamp + api_key + recv_window + payload`, where the payload is the
//! sorted query string for GET and the raw JSON body for POST.
//!
//! Transient failures (network, 5xx, rate limits) are retried with
//! exponential backoff up to a bounded elapsed time; everything else is
//! mapped onto [`VenueError`] and surfaced to the caller.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{Fill, Position, Side};

use super::error::VenueError;
use super::types::*;
use super::venue::Venue;

const MAINNET_URL: &str = "https://api.bybit.com";
const DEMO_URL: &str = "https://api-demo.bybit.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW: &str = "20000";
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

/// Authenticated client for one Bybit account.
pub struct BybitClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BybitClient {
    pub fn new(api_key: String, api_secret: String, demo: bool) -> Result<Self, VenueError> {
        let base = if demo { DEMO_URL } else { MAINNET_URL };
        Self::with_base_url(api_key, api_secret, base.to_string())
    }

    /// Custom base URL, used by tests against a local stub.
    pub fn with_base_url(
        api_key: String,
        api_secret: String,
        base_url: String,
    ) -> Result<Self, VenueError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| VenueError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
        })
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, VenueError> {
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let query = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let op = || {
            let query = query.clone();
            async move {
                let timestamp = Utc::now().timestamp_millis().to_string();
                let signature = self.sign(&timestamp, &query);
                let mut url = format!("{}{}", self.base_url, endpoint);
                if !query.is_empty() {
                    url = format!("{}?{}", url, query);
                }

                debug!(url = %url, "GET");

                let response = self
                    .http
                    .get(&url)
                    .header("X-BAPI-API-KEY", &self.api_key)
                    .header("X-BAPI-TIMESTAMP", &timestamp)
                    .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
                    .header("X-BAPI-SIGN", &signature)
                    .send()
                    .await;

                handle_response(response).await.map_err(classify_for_retry)
            }
        };

        backoff::future::retry(retry_policy(), op).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, VenueError> {
        let body_str =
            serde_json::to_string(body).map_err(|e| VenueError::Parse(e.to_string()))?;

        let op = || {
            let body_str = body_str.clone();
            async move {
                let timestamp = Utc::now().timestamp_millis().to_string();
                let signature = self.sign(&timestamp, &body_str);
                let url = format!("{}{}", self.base_url, endpoint);

                debug!(url = %url, "POST");

                let response = self
                    .http
                    .post(&url)
                    .header("X-BAPI-API-KEY", &self.api_key)
                    .header("X-BAPI-TIMESTAMP", &timestamp)
                    .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
                    .header("X-BAPI-SIGN", &signature)
                    .header("Content-Type", "application/json")
                    .body(body_str)
                    .send()
                    .await;

                handle_response(response).await.map_err(classify_for_retry)
            }
        };

        backoff::future::retry(retry_policy(), op).await
    }
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(MAX_RETRY_ELAPSED),
        ..ExponentialBackoff::default()
    }
}

fn classify_for_retry(err: VenueError) -> backoff::Error<VenueError> {
    if err.is_transient() {
        warn!(error = %err, "Transient venue error, retrying");
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

async fn handle_response<T: DeserializeOwned>(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, VenueError> {
    let response = response.map_err(|e| VenueError::Network(e.to_string()))?;
    let status = response.status();

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(VenueError::Auth(format!("HTTP {}", status)));
    }
    if status.as_u16() == 429 {
        return Err(VenueError::RateLimited(format!("HTTP {}", status)));
    }
    if status.is_server_error() {
        return Err(VenueError::Network(format!("HTTP {}", status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| VenueError::Network(e.to_string()))?;

    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&body).map_err(|e| VenueError::Parse(e.to_string()))?;

    if envelope.ret_code != 0 {
        return Err(VenueError::from_ret(envelope.ret_code, &envelope.ret_msg));
    }

    envelope
        .result
        .ok_or_else(|| VenueError::Parse("missing result payload".to_string()))
}

fn convert_position(p: PositionData) -> Option<Position> {
    let side = Side::parse(&p.side)?;
    let size = parse_decimal(&p.size)?;
    Some(Position {
        symbol: p.symbol,
        side,
        size,
        entry_price: parse_decimal(&p.avg_price).unwrap_or(Decimal::ZERO),
        leverage: p.leverage,
        position_idx: p.position_idx,
        stop_loss: parse_decimal(&p.stop_loss),
    })
}

fn convert_fill(e: ExecutionData) -> Option<Fill> {
    let side = Side::parse(&e.side)?;
    let exec_qty = parse_decimal(&e.exec_qty)?;
    Some(Fill {
        symbol: e.symbol,
        side,
        exec_id: e.exec_id,
        exec_qty,
        closed_size: parse_decimal(&e.closed_size).unwrap_or(Decimal::ZERO),
        exec_type: e.exec_type,
    })
}

#[async_trait]
impl Venue for BybitClient {
    async fn positions(&self) -> Result<Vec<Position>, VenueError> {
        let result: ListResult<PositionData> = self
            .get(
                "/v5/position/list",
                &[
                    ("category", "linear".to_string()),
                    ("settleCoin", "USDT".to_string()),
                ],
            )
            .await?;

        Ok(result.list.into_iter().filter_map(convert_position).collect())
    }

    async fn position(&self, symbol: &str) -> Result<Vec<Position>, VenueError> {
        let result: ListResult<PositionData> = self
            .get(
                "/v5/position/list",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;

        Ok(result.list.into_iter().filter_map(convert_position).collect())
    }

    async fn executions(&self, limit: u32) -> Result<Vec<Fill>, VenueError> {
        let result: ListResult<ExecutionData> = self
            .get(
                "/v5/execution/list",
                &[
                    ("category", "linear".to_string()),
                    ("limit", limit.min(100).to_string()),
                ],
            )
            .await?;

        Ok(result.list.into_iter().filter_map(convert_fill).collect())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        let result: ListResult<OrderData> = self
            .get(
                "/v5/order/realtime",
                &[
                    ("category", "linear".to_string()),
                    ("settleCoin", "USDT".to_string()),
                ],
            )
            .await?;

        Ok(result
            .list
            .into_iter()
            .map(|o| OpenOrder {
                symbol: o.symbol,
                order_id: o.order_id,
            })
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError> {
        let body =
            serde_json::to_value(request).map_err(|e| VenueError::Parse(e.to_string()))?;
        let result: OrderResult = self.post("/v5/order/create", &body).await?;
        Ok(result.order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        });
        match self.post::<serde_json::Value>("/v5/order/cancel", &body).await {
            Ok(_) => Ok(()),
            // Already filled or gone is as good as cancelled.
            Err(e) if e.is_noop() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: &str) -> Result<(), VenueError> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage,
            "sellLeverage": leverage,
        });
        match self
            .post::<serde_json::Value>("/v5/position/set-leverage", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_noop() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_trading_stop(
        &self,
        symbol: &str,
        position_idx: u8,
        stop_price: Decimal,
    ) -> Result<(), VenueError> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "positionIdx": position_idx,
            "tpslMode": "Full",
            "stopLoss": stop_price.normalize().to_string(),
            "slTriggerBy": "MarkPrice",
        });
        self.post::<serde_json::Value>("/v5/position/trading-stop", &body)
            .await
            .map(|_| ())
    }

    async fn closed_pnl(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError> {
        let mut params = vec![
            ("category", "linear".to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("limit", limit.min(100).to_string()),
        ];
        if let Some(s) = symbol {
            params.push(("symbol", s.to_string()));
        }

        let result: ListResult<ClosedPnlData> = self.get("/v5/position/closed-pnl", &params).await?;

        Ok(result
            .list
            .into_iter()
            .filter_map(|r| {
                Some(ClosedPnl {
                    symbol: r.symbol,
                    closed_pnl: parse_decimal(&r.closed_pnl)?,
                    created_time_ms: r.created_time.parse().ok()?,
                })
            })
            .collect())
    }

    async fn total_equity(&self) -> Result<Decimal, VenueError> {
        let result: ListResult<WalletData> = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;

        Ok(result
            .list
            .first()
            .and_then(|w| parse_decimal(&w.total_equity))
            .unwrap_or(Decimal::ZERO))
    }
}
