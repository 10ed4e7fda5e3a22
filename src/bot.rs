//! Orchestration: one single-threaded cooperative loop over the whole
//! replication pipeline.
//!
//! Per tick: poll source fills, classify them against the position map,
//! feed the aggregator, drain ready buckets into the executor, reconcile on
//! cadence, persist the cursor, write the status report. The loop never
//! holds an in-flight action across a shutdown check, so an interrupted run
//! always leaves a consistent state file behind.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::api::{BybitClient, Venue};
use crate::config::CopierConfig;
use crate::models::{CopyEvent, Fill, FillAction, FillIntent, PositionKey};
use crate::notify::{Notifier, StatusReport};
use crate::replication::{new_fills, ActionExecutor, OrderAggregator, Quantizer, Reconciler};
use crate::state::StateStore;

/// Spacing between consecutive order placements during bulk passes.
const ORDER_SPACING: Duration = Duration::from_millis(200);

pub struct Copier {
    config: CopierConfig,
    source: Arc<dyn Venue>,
    destination: Arc<dyn Venue>,
    executor: ActionExecutor,
    reconciler: Reconciler,
    aggregator: OrderAggregator,
    state: StateStore,
    notifier: Notifier,
    quantizer: Quantizer,
    idle_cycles: u32,
    reconcile_due: bool,
    last_reconcile: Instant,
}

impl Copier {
    pub fn new(config: CopierConfig) -> Result<Self> {
        let source = BybitClient::new(
            config.source.api_key.clone(),
            config.source.api_secret.clone(),
            config.source.demo,
        )
        .context("building source account client")?;
        let destination = BybitClient::new(
            config.destination.api_key.clone(),
            config.destination.api_secret.clone(),
            config.destination.demo,
        )
        .context("building destination account client")?;

        Self::with_venues(config, Arc::new(source), Arc::new(destination))
    }

    /// Wire the engine onto explicit venues; tests pass scripted ones.
    pub fn with_venues(
        config: CopierConfig,
        source: Arc<dyn Venue>,
        destination: Arc<dyn Venue>,
    ) -> Result<Self> {
        let quantizer = Quantizer::new(config.qty_precision, config.price_precision);
        let state = StateStore::load(&config.data_dir)?;
        let notifier = Notifier::new(&config.data_dir);

        let executor = ActionExecutor::new(
            source.clone(),
            destination.clone(),
            config.account_mode,
            quantizer,
            config.sl_loss_tiers_usd.clone(),
        );
        let reconciler = Reconciler::new(
            source.clone(),
            destination.clone(),
            config.multiplier,
            quantizer,
            config.symbols_to_copy.clone(),
        );

        Ok(Self {
            config,
            source,
            destination,
            executor,
            reconciler,
            aggregator: OrderAggregator::new(),
            state,
            notifier,
            quantizer,
            idle_cycles: 0,
            reconcile_due: false,
            last_reconcile: Instant::now(),
        })
    }

    /// Run until interrupted. Each tick completes (or fails) in full before
    /// the shutdown signal is honored.
    pub async fn run(&mut self) -> Result<()> {
        self.initial_sync().await?;

        info!(
            multiplier = %self.config.multiplier,
            interval_secs = self.config.loop_interval_secs,
            "Copier running"
        );

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "Cycle failed");
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = sleep(Duration::from_secs(self.config.loop_interval_secs)) => {}
            }
        }

        self.state.save().context("saving state on shutdown")?;
        Ok(())
    }

    /// One pipeline iteration.
    pub async fn tick(&mut self) -> Result<()> {
        let page = self
            .source
            .executions(self.config.fill_fetch_limit)
            .await
            .context("fetching source executions")?;

        let outcome = new_fills(
            self.state.last_exec_id(),
            &page,
            &self.config.symbols_to_copy,
        );
        if outcome.cursor_gap {
            // Fills may have been missed; force a healing pass this tick.
            self.reconcile_due = true;
        }

        let had_fills = !outcome.fills.is_empty();
        for fill in &outcome.fills {
            if let Some(intent) = self.classify(fill) {
                self.aggregator.add_fill(intent);
            }
        }

        let window = Duration::from_secs(self.config.aggregation_window_secs);
        for action in self.aggregator.drain_ready(window) {
            match self.executor.execute(&action, &mut self.state).await {
                Ok(events) => self.emit_events(&events),
                Err(e) => {
                    error!(
                        symbol = %action.symbol,
                        action = action.action.as_str(),
                        error = %e,
                        "Action failed, reconciliation will retry"
                    );
                }
            }
            sleep(ORDER_SPACING).await;
        }

        if had_fills || !self.aggregator.is_empty() {
            self.idle_cycles = 0;
        } else {
            self.idle_cycles += 1;
        }

        if self.should_reconcile() {
            let pending = self.aggregator.peek_pending();
            match self
                .reconciler
                .run_pass(&self.executor, &pending, &mut self.state)
                .await
            {
                Ok(events) => self.emit_events(&events),
                Err(e) => warn!(error = %e, "Reconciliation pass failed"),
            }
            self.last_reconcile = Instant::now();
            self.idle_cycles = 0;
            self.reconcile_due = false;
        }

        if let Some(newest) = outcome.newest_id {
            self.state.set_last_exec_id(newest);
        }
        self.state.save().context("persisting state")?;

        self.write_status().await;
        Ok(())
    }

    fn should_reconcile(&self) -> bool {
        self.reconcile_due
            || self.last_reconcile.elapsed()
                >= Duration::from_secs(self.config.reconcile_interval_secs)
            || self.idle_cycles >= self.config.idle_cycles_before_reconcile
    }

    /// Map one source fill onto a replication intent, or drop it.
    fn classify(&self, fill: &Fill) -> Option<FillIntent> {
        let qty = self
            .quantizer
            .scale_qty(fill.exec_qty, self.config.multiplier);
        if qty <= Decimal::ZERO {
            warn!(
                symbol = %fill.symbol,
                source_qty = %fill.exec_qty,
                "Scaled quantity is zero, fill not replicable"
            );
            return None;
        }

        if fill.closed_size > Decimal::ZERO {
            let position_side = fill.closed_position_side();
            let key = PositionKey::new(fill.symbol.clone(), position_side);
            if !self.state.is_mapped(&key) {
                debug!(key = %key, "Close fill for an unmapped position, ignoring");
                return None;
            }
            return Some(FillIntent {
                symbol: fill.symbol.clone(),
                side: fill.side,
                qty,
                action: FillAction::Close,
                is_increase: false,
                close_side_hint: Some(position_side),
            });
        }

        let key = PositionKey::new(fill.symbol.clone(), fill.side);
        Some(FillIntent {
            symbol: fill.symbol.clone(),
            side: fill.side,
            qty,
            action: FillAction::Open,
            is_increase: self.state.is_mapped(&key),
            close_side_hint: None,
        })
    }

    /// Bring the destination in line with the source before polling starts,
    /// then seed the cursor so history is not replayed.
    pub async fn initial_sync(&mut self) -> Result<()> {
        info!("Initial sync starting");

        let source_positions: Vec<_> = self
            .source
            .positions()
            .await
            .context("fetching source positions")?
            .into_iter()
            .filter(|p| p.size > Decimal::ZERO && self.config.copies_symbol(&p.symbol))
            .collect();
        let destination_positions: Vec<_> = self
            .destination
            .positions()
            .await
            .context("fetching destination positions")?
            .into_iter()
            .filter(|p| p.size > Decimal::ZERO && self.config.copies_symbol(&p.symbol))
            .collect();

        // Flatten destination legs with no source counterpart.
        let source_keys: Vec<PositionKey> = source_positions.iter().map(|p| p.key()).collect();
        for extra in destination_positions
            .iter()
            .filter(|p| !source_keys.contains(&p.key()))
        {
            info!(key = %extra.key(), size = %extra.size, "Closing destination position with no source counterpart");
            match self
                .executor
                .close(&extra.symbol, extra.side, extra.size, true, &mut self.state)
                .await
            {
                Ok(events) => self.emit_events(&events),
                Err(e) => error!(key = %extra.key(), error = %e, "Could not close extra position"),
            }
            sleep(ORDER_SPACING).await;
        }

        // Mirror every source leg at the scaled size.
        for position in &source_positions {
            let key = position.key();
            let expected = self
                .quantizer
                .scale_qty(position.size, self.config.multiplier);
            if expected < self.quantizer.qty_epsilon() {
                warn!(key = %key, expected = %expected, "Scaled size below venue precision, skipping");
                continue;
            }

            let actual = destination_positions
                .iter()
                .find(|p| p.key() == key)
                .map(|p| p.size)
                .unwrap_or(Decimal::ZERO);

            let result = if actual == Decimal::ZERO {
                self.executor
                    .open(&key.symbol, key.side, expected, false, &mut self.state)
                    .await
            } else if (expected - actual).abs() > self.quantizer.qty_epsilon() {
                // Wrong size: flatten and reopen at the scaled quantity.
                info!(key = %key, actual = %actual, expected = %expected, "Reopening mismatched position");
                match self
                    .executor
                    .close(&key.symbol, key.side, actual, true, &mut self.state)
                    .await
                {
                    Ok(events) => {
                        self.emit_events(&events);
                        sleep(ORDER_SPACING).await;
                        self.executor
                            .open(&key.symbol, key.side, expected, false, &mut self.state)
                            .await
                    }
                    Err(e) => Err(e),
                }
            } else {
                debug!(key = %key, size = %actual, "Position already mirrored");
                self.state.map(key.clone());
                continue;
            };

            match result {
                Ok(events) => self.emit_events(&events),
                Err(e) => error!(key = %key, error = %e, "Initial sync failed for position"),
            }
            sleep(ORDER_SPACING).await;
        }

        // Seed the cursor from the newest source execution so the poll loop
        // only sees what happens from now on.
        let page = self
            .source
            .executions(1)
            .await
            .context("seeding execution cursor")?;
        if let Some(newest) = page.first() {
            self.state.set_last_exec_id(newest.exec_id.clone());
        }

        self.state.save().context("persisting state after sync")?;
        info!(mapped = self.state.mapped_count(), "Initial sync complete");
        Ok(())
    }

    /// Cancel every resting destination order and flatten every position.
    pub async fn close_all(&mut self) -> Result<()> {
        for order in self
            .destination
            .open_orders()
            .await
            .context("fetching destination orders")?
        {
            info!(symbol = %order.symbol, order_id = %order.order_id, "Cancelling order");
            if let Err(e) = self
                .destination
                .cancel_order(&order.symbol, &order.order_id)
                .await
            {
                warn!(symbol = %order.symbol, error = %e, "Cancel failed");
            }
        }

        let positions: Vec<_> = self
            .destination
            .positions()
            .await
            .context("fetching destination positions")?
            .into_iter()
            .filter(|p| p.size > Decimal::ZERO)
            .collect();

        info!(count = positions.len(), "Closing all destination positions");
        for position in positions {
            match self
                .executor
                .close(
                    &position.symbol,
                    position.side,
                    position.size,
                    true,
                    &mut self.state,
                )
                .await
            {
                Ok(events) => self.emit_events(&events),
                Err(e) => error!(key = %position.key(), error = %e, "Close failed"),
            }
            sleep(ORDER_SPACING).await;
        }

        self.state.save().context("persisting state")?;
        Ok(())
    }

    fn emit_events(&self, events: &[CopyEvent]) {
        for event in events {
            if let Err(e) = self.notifier.emit(event) {
                error!(error = %e, "Event log write failed");
            }
        }
    }

    /// Best effort: a failed status write never fails the tick.
    async fn write_status(&self) {
        let report = match self.build_status().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Status snapshot failed");
                return;
            }
        };
        if let Err(e) = self.notifier.write_status(&report) {
            warn!(error = %e, "Status write failed");
        }
    }

    async fn build_status(&self) -> Result<StatusReport> {
        let source_positions = self.source.positions().await?;
        let destination_positions = self.destination.positions().await?;
        let source_equity = self.source.total_equity().await?;
        let destination_equity = self.destination.total_equity().await?;

        Ok(StatusReport {
            source_equity,
            destination_equity,
            source_open_positions: source_positions
                .iter()
                .filter(|p| p.size > Decimal::ZERO)
                .count(),
            destination_open_positions: destination_positions
                .iter()
                .filter(|p| p.size > Decimal::ZERO)
                .count(),
            mapped_keys: self.state.mapped_count(),
            last_exec_id: self.state.last_exec_id().map(str::to_string),
            updated_at: Utc::now(),
        })
    }
}
