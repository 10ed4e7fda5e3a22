//! Turns aggregated actions into destination orders.
//!
//! All state mutation happens here and only after the venue confirms the
//! order. A rejected order leaves the position map untouched so the next
//! reconciliation pass can retry the correction.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::{OrderRequest, Venue, VenueError};
use crate::config::AccountMode;
use crate::models::{CopyEvent, FillAction, PositionKey, Side};
use crate::state::StateStore;

use super::aggregator::AggregatedAction;
use super::quantize::Quantizer;
use super::stoploss;

const CLOSED_PNL_FETCH_LIMIT: u32 = 100;

pub struct ActionExecutor {
    source: Arc<dyn Venue>,
    destination: Arc<dyn Venue>,
    account_mode: AccountMode,
    quantizer: Quantizer,
    sl_tiers: Vec<Decimal>,
}

impl ActionExecutor {
    pub fn new(
        source: Arc<dyn Venue>,
        destination: Arc<dyn Venue>,
        account_mode: AccountMode,
        quantizer: Quantizer,
        sl_tiers: Vec<Decimal>,
    ) -> Self {
        Self {
            source,
            destination,
            account_mode,
            quantizer,
            sl_tiers,
        }
    }

    /// Execute one aggregated action, returning the events it produced.
    pub async fn execute(
        &self,
        action: &AggregatedAction,
        state: &mut StateStore,
    ) -> Result<Vec<CopyEvent>, VenueError> {
        if action.qty <= Decimal::ZERO {
            warn!(symbol = %action.symbol, qty = %action.qty, "Skipping action with non-positive quantity");
            return Ok(Vec::new());
        }

        match action.action {
            FillAction::Open => {
                self.open(
                    &action.symbol,
                    action.side,
                    action.qty,
                    action.is_increase,
                    state,
                )
                .await
            }
            FillAction::Close => {
                let position_side = action
                    .close_side_hint
                    .unwrap_or_else(|| action.side.opposite());
                self.close(&action.symbol, position_side, action.qty, true, state)
                    .await
            }
        }
    }

    /// Open or increase a destination position.
    pub async fn open(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        is_increase: bool,
        state: &mut StateStore,
    ) -> Result<Vec<CopyEvent>, VenueError> {
        if !is_increase {
            self.mirror_leverage(symbol).await;
        }

        let request = OrderRequest::market(
            symbol,
            side,
            qty,
            false,
            self.account_mode.position_idx(side),
        );
        let order_id = self.destination.place_order(&request).await?;
        info!(
            symbol = %symbol,
            side = %side,
            qty = %qty,
            order_id = %order_id,
            is_increase,
            "Replicated open"
        );

        state.map(PositionKey::new(symbol, side));

        let mut events = vec![CopyEvent::open(symbol, side, qty, is_increase)];
        self.protect(symbol, side, &mut events).await;
        Ok(events)
    }

    /// Reduce-only close of a destination position leg. `full_close` unmaps
    /// the key and attaches PnL figures to the event; a partial reduction
    /// leaves the mapping in place.
    pub async fn close(
        &self,
        symbol: &str,
        position_side: Side,
        qty: Decimal,
        full_close: bool,
        state: &mut StateStore,
    ) -> Result<Vec<CopyEvent>, VenueError> {
        let order_side = position_side.opposite();
        let request = OrderRequest::market(
            symbol,
            order_side,
            qty,
            true,
            self.account_mode.position_idx(position_side),
        );
        let order_id = self.destination.place_order(&request).await?;
        info!(
            symbol = %symbol,
            position_side = %position_side,
            qty = %qty,
            order_id = %order_id,
            full_close,
            "Replicated close"
        );

        if full_close {
            state.unmap(&PositionKey::new(symbol, position_side));
            let (pnl, daily_pnl) = self.pnl_after_close(symbol).await;
            return Ok(vec![CopyEvent::close(
                symbol,
                position_side,
                qty,
                pnl,
                daily_pnl,
            )]);
        }

        Ok(vec![CopyEvent::close(symbol, position_side, qty, None, None)])
    }

    /// Mirror the source position's leverage onto the destination symbol.
    /// Failure is logged, not fatal: the order is still worth placing.
    async fn mirror_leverage(&self, symbol: &str) {
        let rows = match self.source.position(symbol).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Could not read source leverage");
                return;
            }
        };

        let Some(leverage) = rows
            .iter()
            .map(|p| p.leverage.as_str())
            .find(|l| !l.is_empty())
        else {
            return;
        };

        if let Err(e) = self.destination.set_leverage(symbol, leverage).await {
            warn!(symbol = %symbol, leverage = %leverage, error = %e, "Could not mirror leverage");
        }
    }

    /// Ensure the freshly opened leg carries a protective stop. Emits
    /// `sl_set` on success and `unprotected` when no tier can protect the
    /// position; other failures are logged and retried by the stop sweep.
    async fn protect(&self, symbol: &str, side: Side, events: &mut Vec<CopyEvent>) {
        let rows = match self.destination.position(symbol).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Could not read destination position for stop placement");
                return;
            }
        };
        let Some(position) = rows.iter().find(|p| p.side == side && p.size > Decimal::ZERO)
        else {
            return;
        };

        if stoploss::protective_price(
            position.entry_price,
            position.size,
            side,
            &self.sl_tiers,
            &self.quantizer,
        )
        .is_none()
        {
            warn!(symbol = %symbol, side = %side, "No stop-loss tier yields a valid price");
            events.push(CopyEvent::unprotected(symbol, side, position.size));
            return;
        }

        match stoploss::ensure_protective_stop(
            self.destination.as_ref(),
            position,
            &self.sl_tiers,
            &self.quantizer,
        )
        .await
        {
            Ok(Some(stop_price)) => {
                events.push(CopyEvent::sl_set(symbol, side, position.size, stop_price));
            }
            Ok(None) => {}
            Err(VenueError::PriceTooClose(_)) => {
                warn!(symbol = %symbol, side = %side, "Every stop-loss tier rejected as too close");
                events.push(CopyEvent::unprotected(symbol, side, position.size));
            }
            Err(e) => {
                warn!(symbol = %symbol, side = %side, error = %e, "Stop-loss placement failed");
            }
        }
    }

    /// Trade PnL and PnL-since-UTC-midnight, from one closed-PnL query.
    /// Returns `None`s on failure; the close event still goes out.
    async fn pnl_after_close(&self, symbol: &str) -> (Option<Decimal>, Option<Decimal>) {
        let records = match self
            .destination
            .closed_pnl(None, utc_midnight(), CLOSED_PNL_FETCH_LIMIT)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Closed-PnL query failed");
                return (None, None);
            }
        };

        let daily: Decimal = records.iter().map(|r| r.closed_pnl).sum();
        // Newest first, so the first matching record is the trade just closed.
        let trade = records
            .iter()
            .find(|r| r.symbol == symbol)
            .map(|r| r.closed_pnl);
        (trade, Some(daily))
    }
}

fn utc_midnight() -> DateTime<Utc> {
    Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc()
}
