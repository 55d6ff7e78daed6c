//! The position-lifecycle control loop.
//!
//! A single task owns every piece of mutable state (ratings, z-score
//! history, positions, reservations) and runs a fixed-period cycle:
//! refresh ratings for the whole universe, generate signals, evaluate
//! exits, then evaluate entries — in that order, so capital freed by an
//! exit is visible to entries within the same cycle. Price-stream pushes
//! and commands hand off into the same task via channels; nothing mutates
//! state from outside it.

use crate::allocation::{AllocationManager, ReservationOutcome};
use crate::executor::ExecutionAdapter;
use crate::oco::{self, OcoTrigger};
use crate::position::{OrderRefs, Position, PositionBook};
use crate::risk::RiskTracker;
use anyhow::{Context, Result};
use arena_trade_core::{
    BalanceSource, EngineConfig, EngineEvent, EventBus, ExchangeClient, ExecutionMode, ExitReason,
    Kline, OrderSide, ParameterStore, PriceUpdate, RiskLimitKind,
};
use arena_trade_rating::{Observation, RatingEngine, VolumeMetrics};
use arena_trade_signals::{SignalBatch, SignalDirection, SignalGenerator, TradeSignal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub enum EngineCommand {
    Stop,
    EmergencyStop,
    GetStatus(oneshot::Sender<EngineStatus>),
}

#[derive(Debug, Clone)]
pub struct PositionSummary {
    pub symbol: String,
    pub entry_price: Decimal,
    pub remaining_quantity: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub mode: ExecutionMode,
    pub cycle_count: u64,
    pub open_positions: Vec<PositionSummary>,
    pub total_reserved: Decimal,
    pub equity: Decimal,
}

/// Cloneable command-side handle to a running [`PositionManager`].
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    /// # Errors
    /// Returns an error if the command cannot be sent to the engine task.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(EngineCommand::Stop).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the command cannot be sent to the engine task.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.tx.send(EngineCommand::EmergencyStop).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the command cannot be sent or the response
    /// cannot be received.
    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::GetStatus(tx)).await?;
        let status = rx.await?;
        Ok(status)
    }
}

/// Orchestrates ratings, signals, entries, brackets, and exits.
pub struct PositionManager {
    config: EngineConfig,
    params: ParameterStore,
    exchange: Arc<dyn ExchangeClient>,
    adapter: Box<dyn ExecutionAdapter>,
    balance: Arc<dyn BalanceSource>,
    rating_engine: RatingEngine,
    signal_generator: SignalGenerator,
    allocation: AllocationManager,
    book: PositionBook,
    risk: RiskTracker,
    cooldowns: HashMap<String, DateTime<Utc>>,
    events: EventBus,
    cycle_count: u64,
}

impl PositionManager {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        params: ParameterStore,
        exchange: Arc<dyn ExchangeClient>,
        adapter: Box<dyn ExecutionAdapter>,
        balance: Arc<dyn BalanceSource>,
    ) -> Self {
        let signal_generator = SignalGenerator::new(params.max_moving_average_period());
        let allocation = AllocationManager::new(config.min_notional);
        let risk = RiskTracker::new(config.risk.clone(), Decimal::ZERO, Utc::now());
        Self {
            config,
            params,
            exchange,
            adapter,
            balance,
            rating_engine: RatingEngine::new(),
            signal_generator,
            allocation,
            book: PositionBook::new(),
            risk,
            cooldowns: HashMap::new(),
            events: EventBus::default(),
            cycle_count: 0,
        }
    }

    /// Subscribe to engine events before (or after) starting the loop.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Runs the control loop until a Stop/EmergencyStop command arrives or
    /// the command channel closes.
    ///
    /// # Errors
    ///
    /// Only unrecoverable startup failures (the collaborator cannot
    /// initialize) abort the loop with an error; per-cycle and per-symbol
    /// failures are isolated and surfaced as events.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) -> Result<()> {
        self.initialize().await?;

        let symbols = self.params.enabled_symbols();
        let mut price_rx = self
            .exchange
            .subscribe_prices(&symbols)
            .await
            .context("price stream subscription failed")?;

        self.events.publish(EngineEvent::Started);
        tracing::info!(
            universe = symbols.len(),
            interval_secs = self.config.cycle_interval_secs,
            mode = ?self.adapter.mode(),
            "engine started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.cycle_interval_secs));
        // Non-overlapping cycles: the next tick is delivered only after the
        // current cycle body has completed.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if let Err(error) = self.run_cycle(now).await {
                        tracing::error!(%error, "cycle failed");
                        self.events.publish(EngineEvent::TradingError {
                            symbol: None,
                            message: error.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                Some(update) = price_rx.recv() => {
                    self.handle_price_update(update).await;
                }
                command = commands.recv() => {
                    match command {
                        Some(EngineCommand::Stop) | None => break,
                        Some(EngineCommand::EmergencyStop) => {
                            self.emergency_stop().await;
                            break;
                        }
                        Some(EngineCommand::GetStatus(reply)) => {
                            let _ = reply.send(self.status());
                        }
                    }
                }
            }
        }

        self.events.publish(EngineEvent::Stopped);
        tracing::info!("engine stopped");
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        let initial_equity = self
            .balance
            .available_balance()
            .await
            .context("initial balance lookup failed")?;
        self.risk = RiskTracker::new(self.config.risk.clone(), initial_equity, Utc::now());
        Ok(())
    }

    /// One full cycle: ratings, signals, exits, entries.
    async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.cycle_count += 1;
        tracing::debug!(cycle = self.cycle_count, "cycle start");

        self.refresh_ratings(now).await;
        let batch = self.generate_signals(now);
        self.evaluate_exits(&batch, now).await;
        self.evaluate_entries(&batch, now).await;

        Ok(())
    }

    /// Fetches the latest bar for every enabled symbol concurrently, then
    /// merges deterministically (sorted by symbol) before mutating any
    /// rating state.
    async fn refresh_ratings(&mut self, now: DateTime<Utc>) {
        let symbols = self.params.enabled_symbols();

        let fetches = symbols.iter().map(|symbol| {
            let exchange = Arc::clone(&self.exchange);
            let interval = self.config.kline_interval.clone();
            let symbol = symbol.clone();
            async move {
                let result = exchange.get_klines(&symbol, &interval, None, None, 2).await;
                (symbol, result)
            }
        });
        let mut results: Vec<(String, Result<Vec<Kline>>)> = join_all(fetches).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (symbol, result) in results {
            match result {
                Ok(klines) => {
                    // The newest bar may still be forming; prefer the last
                    // closed one.
                    let kline = if klines.len() >= 2 {
                        &klines[klines.len() - 2]
                    } else if let Some(kline) = klines.last() {
                        kline
                    } else {
                        continue;
                    };
                    let observation = self.observation_from_kline(&symbol, kline);
                    self.rating_engine.process_observation(&observation);
                }
                Err(error) => {
                    tracing::warn!(symbol = %symbol, %error, "kline fetch failed, cooling symbol down");
                    self.cooldowns.insert(
                        symbol.clone(),
                        now + ChronoDuration::seconds(self.config.risk.cooldown_period_secs as i64),
                    );
                    self.events.publish(EngineEvent::TradingError {
                        symbol: Some(symbol),
                        message: error.to_string(),
                        timestamp: now,
                    });
                }
            }
        }

        self.rating_engine.apply_period(now);
        self.rating_engine.normalize_ratings();
    }

    fn observation_from_kline(&self, symbol: &str, kline: &Kline) -> Observation {
        let params = self.params.get(symbol);
        let volume = kline.taker_buy_volume.map(|taker_buy| VolumeMetrics {
            total_volume: kline.volume.to_f64().unwrap_or(f64::NAN),
            taker_buy_volume: taker_buy.to_f64().unwrap_or(f64::NAN),
        });
        Observation {
            base_asset: params.base_asset,
            quote_asset: params.quote_asset,
            open: kline.open.to_f64().unwrap_or(f64::NAN),
            close: kline.close.to_f64().unwrap_or(f64::NAN),
            timestamp: kline.close_time,
            volume,
        }
    }

    /// Cross-sectional pass over the tracked base assets. The quote asset
    /// is the numeraire and excluded from the cross-section.
    fn generate_signals(&mut self, now: DateTime<Utc>) -> SignalBatch {
        let snapshot = self.rating_engine.ratings_snapshot();
        let mut ratings = HashMap::new();
        for symbol in self.params.enabled_symbols() {
            let params = self.params.get(&symbol);
            if let Some(rating) = snapshot.get(&params.base_asset) {
                ratings.insert(params.base_asset, *rating);
            }
        }

        let batch = self.signal_generator.generate_signals(&ratings, &self.params, now);

        let mut evaluated: Vec<(&String, &f64)> = batch.moving_average_z.iter().collect();
        evaluated.sort_by(|a, b| a.0.cmp(b.0));
        for (symbol, moving_average_z) in evaluated {
            let params = self.params.get(symbol);
            let raw_z = batch.z_scores.get(&params.base_asset).copied().unwrap_or(0.0);
            let rating = ratings.get(&params.base_asset).copied().unwrap_or(0.0);
            self.events.publish(EngineEvent::ZScoreCalculated {
                symbol: symbol.clone(),
                raw_z,
                moving_average_z: *moving_average_z,
                rating,
            });
        }

        self.events.publish(EngineEvent::SignalsChecked {
            total_signals: batch.moving_average_z.len(),
            strong_signals: batch.signals.len(),
            timestamp: now,
        });

        batch
    }

    /// Exit pass over all OPEN positions; runs before entries so freed
    /// capital is available within the same cycle. Failures are isolated
    /// per symbol.
    async fn evaluate_exits(&mut self, batch: &SignalBatch, now: DateTime<Utc>) {
        for symbol in self.book.open_symbols() {
            if let Err(error) = self.evaluate_exit_for(&symbol, batch, now).await {
                tracing::warn!(symbol = %symbol, %error, "exit evaluation failed");
                self.events.publish(EngineEvent::TradingError {
                    symbol: Some(symbol),
                    message: error.to_string(),
                    timestamp: now,
                });
            }
        }
    }

    async fn evaluate_exit_for(
        &mut self,
        symbol: &str,
        batch: &SignalBatch,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(position) = self.book.open_position(symbol) else {
            return Ok(());
        };
        let threshold = position.parameters.z_score_threshold;
        let (take_profit, stop_loss) = (position.take_profit_price, position.stop_loss_price);

        // A sustained negative z overrides the passive bracket with an
        // immediate unconditional exit.
        if let Some(&moving_average_z) = batch.moving_average_z.get(symbol) {
            if moving_average_z <= -threshold {
                self.events.publish(EngineEvent::ZScoreReversal {
                    symbol: symbol.to_string(),
                    moving_average_z,
                    threshold,
                });
                return self.close_position(symbol, ExitReason::ZScoreReversal, now).await;
            }
        }

        let price = self.exchange.get_current_price(symbol).await?;
        if let Some(position) = self.book.open_position_mut(symbol) {
            position.mark_price(price);
        }

        match oco::check_oco_condition(price, take_profit, stop_loss) {
            Some(OcoTrigger::TakeProfit) => {
                self.close_position(symbol, ExitReason::TakeProfit, now).await
            }
            Some(OcoTrigger::StopLoss) => {
                self.close_position(symbol, ExitReason::StopLoss, now).await
            }
            None => Ok(()),
        }
    }

    /// OPEN -> CLOSING -> FLAT. Bracket cancellation is attempted first;
    /// a cancellation failure (the order may already have filled) never
    /// blocks the compensating order — remaining quantity reconciles a
    /// possible double-exit.
    async fn close_position(
        &mut self,
        symbol: &str,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut position) = self.book.begin_close(symbol) else {
            return Ok(());
        };

        if !position.order_refs.bracket_order_ids.is_empty() {
            if let Err(error) = self
                .adapter
                .cancel_orders(symbol, &position.order_refs.bracket_order_ids)
                .await
            {
                tracing::warn!(
                    symbol,
                    %error,
                    "bracket cancellation failed, proceeding with compensating exit"
                );
            }
        }

        let quantity = position.remaining_quantity;
        if quantity <= Decimal::ZERO {
            self.allocation.release_funds(symbol);
            self.book.set_flat(symbol);
            return Ok(());
        }

        match self.adapter.execute_exit(symbol, quantity).await {
            Ok(fill) => {
                position.reduce(fill.quantity);
                let result =
                    oco::calculate_profit_loss(position.entry_price, fill.price, fill.quantity);
                self.risk.record_realized_pnl(result.pnl, now);
                self.publish_trade(symbol, OrderSide::Sell, fill.quantity, fill.price, now);

                if position.remaining_quantity > Decimal::ZERO {
                    // Partial fill: hold the rest, retry next cycle.
                    tracing::warn!(
                        symbol,
                        remaining = %position.remaining_quantity,
                        "partial exit fill"
                    );
                    self.book.reopen(position);
                } else {
                    self.allocation.release_funds(symbol);
                    self.book.set_flat(symbol);
                    self.events.publish(EngineEvent::PositionClosed {
                        symbol: symbol.to_string(),
                        reason,
                        pnl: result.pnl,
                        pnl_percent: result.pnl_percent,
                        timestamp: now,
                    });
                    tracing::info!(symbol, ?reason, pnl = %result.pnl, "position closed");
                }
                Ok(())
            }
            Err(error) => {
                // Still holding inventory: back to OPEN so the next cycle
                // retries the exit.
                self.book.reopen(position);
                Err(error)
            }
        }
    }

    /// Entry pass, gated by risk limits, cooldowns, the position cap, and
    /// the allocation ledger.
    async fn evaluate_entries(&mut self, batch: &SignalBatch, now: DateTime<Utc>) {
        if let Some(kind) = self.risk.breached_limit(now) {
            tracing::warn!(?kind, "risk limit breached, suppressing entries");
            self.events.publish(EngineEvent::RiskLimitHit(kind));
            return;
        }

        for signal in &batch.signals {
            if signal.direction != SignalDirection::Buy {
                continue;
            }
            if let Err(error) = self.try_enter(signal, now).await {
                tracing::warn!(symbol = %signal.symbol, %error, "entry failed");
                self.events.publish(EngineEvent::TradingError {
                    symbol: Some(signal.symbol.clone()),
                    message: error.to_string(),
                    timestamp: now,
                });
            }
        }
    }

    async fn try_enter(&mut self, signal: &TradeSignal, now: DateTime<Utc>) -> Result<()> {
        let symbol = &signal.symbol;
        if !self.book.is_flat(symbol) {
            return Ok(());
        }
        if let Some(until) = self.cooldowns.get(symbol) {
            if *until > now {
                tracing::debug!(symbol = %symbol, until = %until, "symbol cooling down");
                return Ok(());
            }
        }
        if self.book.active_count() >= self.config.max_positions {
            self.events
                .publish(EngineEvent::RiskLimitHit(RiskLimitKind::MaxPositions));
            return Ok(());
        }

        let params = self.params.get(symbol);
        let outcome = self
            .allocation
            .reserve_funds(symbol, params.allocation_percent, self.balance.as_ref())
            .await?;
        let amount = match outcome {
            ReservationOutcome::Reserved { amount } => amount,
            ReservationOutcome::Rejected(reason) => {
                // Not acted on, no retry; the next cycle re-evaluates.
                tracing::debug!(symbol = %symbol, ?reason, "reservation rejected");
                return Ok(());
            }
        };

        self.book.set_entering(symbol);
        let fill = match self.adapter.execute_entry(symbol, amount).await {
            Ok(fill) => fill,
            Err(error) => {
                self.allocation.release_funds(symbol);
                self.book.set_flat(symbol);
                self.cooldowns.insert(
                    symbol.clone(),
                    now + ChronoDuration::seconds(self.config.risk.cooldown_period_secs as i64),
                );
                return Err(error);
            }
        };
        self.allocation.update_reservation(symbol, &fill.order_id);

        let prices = match oco::calculate_oco_prices(
            fill.price,
            params.profit_percent,
            params.stop_loss_percent,
        ) {
            Ok(prices) => prices,
            Err(error) => {
                // The entry filled but no sane bracket exists: unwind it.
                tracing::error!(symbol = %symbol, %error, "bracket prices invalid, unwinding entry");
                let _ = self.adapter.execute_exit(symbol, fill.quantity).await;
                self.allocation.release_funds(symbol);
                self.book.set_flat(symbol);
                self.cooldowns.insert(
                    symbol.clone(),
                    now + ChronoDuration::seconds(self.config.risk.cooldown_period_secs as i64),
                );
                return Err(error.into());
            }
        };

        let bracket_order_ids = match self
            .adapter
            .place_bracket(symbol, fill.quantity, &prices)
            .await
        {
            Ok(ids) => ids,
            Err(error) => {
                tracing::warn!(
                    symbol = %symbol,
                    %error,
                    "bracket placement failed, position unprotected until next cycle"
                );
                self.events.publish(EngineEvent::TradingError {
                    symbol: Some(symbol.clone()),
                    message: error.to_string(),
                    timestamp: now,
                });
                Vec::new()
            }
        };

        let position = Position {
            symbol: symbol.clone(),
            entry_price: fill.price,
            quantity: fill.quantity,
            remaining_quantity: fill.quantity,
            entry_time: fill.timestamp,
            take_profit_price: prices.take_profit,
            stop_loss_price: prices.stop_loss,
            order_refs: OrderRefs {
                entry_order_id: Some(fill.order_id.clone()),
                bracket_order_ids,
            },
            parameters: params,
            unrealized_pnl: Decimal::ZERO,
        };
        self.book.set_open(position);

        self.events.publish(EngineEvent::SignalProcessed {
            symbol: symbol.clone(),
            moving_average_z: signal.moving_average_z,
            timestamp: now,
        });
        self.publish_trade(symbol, OrderSide::Buy, fill.quantity, fill.price, now);
        tracing::info!(
            symbol = %symbol,
            price = %fill.price,
            quantity = %fill.quantity,
            z = signal.moving_average_z,
            "position opened"
        );
        Ok(())
    }

    /// Asynchronous price pushes hand off into this serialized context;
    /// they mark unrealized P&L and can trigger a bracket exit between
    /// cycles.
    async fn handle_price_update(&mut self, update: PriceUpdate) {
        let Some(position) = self.book.open_position_mut(&update.symbol) else {
            return;
        };
        position.mark_price(update.price);
        let (take_profit, stop_loss) = (position.take_profit_price, position.stop_loss_price);

        let reason = match oco::check_oco_condition(update.price, take_profit, stop_loss) {
            Some(OcoTrigger::TakeProfit) => ExitReason::TakeProfit,
            Some(OcoTrigger::StopLoss) => ExitReason::StopLoss,
            None => return,
        };
        if let Err(error) = self
            .close_position(&update.symbol, reason, update.timestamp)
            .await
        {
            tracing::warn!(symbol = %update.symbol, %error, "price-triggered exit failed");
            self.events.publish(EngineEvent::TradingError {
                symbol: Some(update.symbol),
                message: error.to_string(),
                timestamp: update.timestamp,
            });
        }
    }

    /// Synchronous shutdown path: cancel every known order (individual
    /// failures logged, not fatal), clear the ledger, drop all positions.
    async fn emergency_stop(&mut self) {
        tracing::warn!("emergency stop");

        let inventory: Vec<Position> = self.book.inventory().into_iter().cloned().collect();
        for position in inventory {
            for order_id in &position.order_refs.bracket_order_ids {
                if let Err(error) = self
                    .adapter
                    .cancel_orders(&position.symbol, std::slice::from_ref(order_id))
                    .await
                {
                    tracing::warn!(
                        symbol = %position.symbol,
                        order_id = %order_id,
                        %error,
                        "cancel failed during emergency stop"
                    );
                }
            }
        }

        self.allocation.clear_all_reservations();
        self.book.clear();
        self.events.publish(EngineEvent::EmergencyStop);
    }

    fn publish_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) {
        let event = match self.adapter.mode() {
            ExecutionMode::Paper => EngineEvent::PaperTrade {
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                timestamp,
            },
            ExecutionMode::Live => EngineEvent::LiveTradeExecuted {
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                timestamp,
            },
        };
        self.events.publish(event);
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.adapter.mode(),
            cycle_count: self.cycle_count,
            open_positions: self
                .book
                .inventory()
                .into_iter()
                .map(|p| PositionSummary {
                    symbol: p.symbol.clone(),
                    entry_price: p.entry_price,
                    remaining_quantity: p.remaining_quantity,
                    unrealized_pnl: p.unrealized_pnl,
                })
                .collect(),
            total_reserved: self.allocation.total_reserved(),
            equity: self.risk.equity(),
        }
    }
}
