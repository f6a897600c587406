//! Per-bot event loop.
//!
//! Pulls ticks with a timeout (timeout means idle, not error), dispatches to
//! the grid engine or the strategy evaluator, and submits the resulting
//! intents to the exchange gateway under a bounded await. Transient errors
//! retry by looping; the consecutive-error threshold stops the bot for good.

use crate::data::{CandleAggregator, CandleRing};
use crate::exchange::{ExchangeError, ExchangeGateway, FillEvent, OrderRef, PositionSnapshot};
use crate::grid::{GridCycle, GridEngine, GridStep, OrderIntent};
use crate::orchestrator::{BotStats, EngineTuning};
use crate::resource::ResourceController;
use crate::store::BotStore;
use crate::strategy::{Evaluate, TradeAction};
use crate::stream::{Tick, TickQueue};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use shared::models::{BotInstance, Side, TradeRecord, TradeSource};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub(crate) enum RunnerKind {
    Grid {
        engine: GridEngine,
        /// Live order refs by exchange order id, for cancels and fill polling.
        refs: HashMap<String, OrderRef>,
    },
    Trend {
        evaluator: Box<dyn Evaluate>,
        ring: CandleRing,
        aggregator: CandleAggregator,
        order_qty: f64,
    },
}

pub(crate) struct BotRunner {
    pub bot: BotInstance,
    pub kind: RunnerKind,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub store: Arc<dyn BotStore>,
    pub resources: Arc<ResourceController>,
    pub ticks: Arc<TickQueue>,
    pub stats: Arc<BotStats>,
    pub tuning: EngineTuning,
}

impl BotRunner {
    pub(crate) async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        info!(bot_id = %self.bot.id, symbol = %self.bot.symbol, "bot loop started");

        loop {
            if *stop_rx.borrow() {
                break;
            }
            let tick = tokio::select! {
                _ = stop_rx.changed() => break,
                tick = self.ticks.recv_timeout(self.tuning.tick_timeout) => tick,
            };
            let Some(tick) = tick else {
                trace!(bot_id = %self.bot.id, "no market data within timeout, idling");
                continue;
            };
            if tick.symbol != self.bot.symbol {
                continue;
            }
            self.stats.total_ticks.fetch_add(1, Ordering::SeqCst);

            match self.process_tick(&tick).await {
                Ok(ControlFlow::Continue(())) => {
                    self.stats.consecutive_errors.store(0, Ordering::SeqCst);
                }
                Ok(ControlFlow::Break(())) => break,
                Err(e) => {
                    let errors = self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(
                        bot_id = %self.bot.id,
                        consecutive = errors,
                        "bot tick failed: {e:#}"
                    );
                    if errors >= self.tuning.max_consecutive_errors {
                        let message =
                            format!("stopped after {errors} consecutive errors: {e:#}");
                        error!(bot_id = %self.bot.id, "{message}");
                        self.stats.set_last_error(message.clone());
                        self.bot.last_error = Some(message);
                        break;
                    }
                }
            }
        }

        self.finish().await;
    }

    async fn process_tick(&mut self, tick: &Tick) -> Result<ControlFlow<()>> {
        match self.kind {
            RunnerKind::Grid { .. } => self.process_grid_tick(tick).await,
            RunnerKind::Trend { .. } => self.process_trend_tick(tick).await,
        }
    }

    async fn process_grid_tick(&mut self, tick: &Tick) -> Result<ControlFlow<()>> {
        let step = {
            let RunnerKind::Grid { engine, .. } = &mut self.kind else { unreachable!() };
            engine.on_tick(tick.price)
        };

        match step {
            GridStep::Idle => {}
            GridStep::Place(intents) => {
                self.execute_intents(intents).await?;
                self.persist_grid().await;
            }
            GridStep::Halt(intents) => {
                // halt protection runs to completion; the stop signal is only
                // observed again at the top of the loop, and an individual
                // cancel racing a fill must not leave the halt half-done
                for intent in intents {
                    if let Err(e) = self.execute_intent(intent).await {
                        warn!(bot_id = %self.bot.id, "halt action failed: {e:#}");
                    }
                }
                self.bot.is_active = false;
                self.persist_grid().await;
                warn!(bot_id = %self.bot.id, price = tick.price, "grid halted, deactivating bot");
                return Ok(ControlFlow::Break(()));
            }
        }

        self.poll_grid_fills().await?;
        Ok(ControlFlow::Continue(()))
    }

    async fn poll_grid_fills(&mut self) -> Result<()> {
        let outstanding: Vec<OrderRef> = {
            let RunnerKind::Grid { engine, refs } = &self.kind else { unreachable!() };
            engine
                .outstanding_order_ids()
                .iter()
                .filter_map(|id| refs.get(id).cloned())
                .collect()
        };

        for order in outstanding {
            let Some(fill) = self.get_fills_bounded(&order).await? else {
                continue;
            };
            let outcome = {
                let RunnerKind::Grid { engine, refs } = &mut self.kind else { unreachable!() };
                refs.remove(&fill.order_id);
                engine.on_fill(&fill.order_id, fill.price, fill.qty, fill.fee)
            };
            if let Some(cycle) = outcome.completed {
                self.record_grid_cycle(&cycle).await;
            }
            if !outcome.intents.is_empty() {
                self.execute_intents(outcome.intents).await?;
            }
            self.persist_grid().await;
        }
        Ok(())
    }

    async fn execute_intents(&mut self, intents: Vec<OrderIntent>) -> Result<()> {
        for intent in intents {
            self.execute_intent(intent).await?;
        }
        Ok(())
    }

    async fn execute_intent(&mut self, intent: OrderIntent) -> Result<()> {
        match intent {
            OrderIntent::PlaceBuy { grid_index, price, qty } => {
                let order = self.place_bounded(Side::Buy, qty, Some(price)).await?;
                let RunnerKind::Grid { engine, refs } = &mut self.kind else { unreachable!() };
                engine.buy_placed(grid_index, order.id.clone());
                refs.insert(order.id.clone(), order);
            }
            OrderIntent::PlaceSell { grid_index, price, qty } => {
                let order = self.place_bounded(Side::Sell, qty, Some(price)).await?;
                let RunnerKind::Grid { engine, refs } = &mut self.kind else { unreachable!() };
                engine.sell_placed(grid_index, order.id.clone());
                refs.insert(order.id.clone(), order);
            }
            OrderIntent::Cancel { order_id } => {
                let order = {
                    let RunnerKind::Grid { refs, .. } = &self.kind else { unreachable!() };
                    refs.get(&order_id).cloned()
                };
                if let Some(order) = order {
                    self.cancel_bounded(&order).await?;
                    let RunnerKind::Grid { refs, .. } = &mut self.kind else { unreachable!() };
                    refs.remove(&order_id);
                }
            }
            OrderIntent::MarketClose { grid_index, qty } => {
                debug!(bot_id = %self.bot.id, grid_index, qty, "market-closing level inventory");
                self.place_bounded(Side::Sell, qty, None).await?;
            }
        }
        Ok(())
    }

    async fn process_trend_tick(&mut self, tick: &Tick) -> Result<ControlFlow<()>> {
        let completed = {
            let RunnerKind::Trend { aggregator, .. } = &mut self.kind else { unreachable!() };
            aggregator.on_tick(tick.price, tick.qty, tick.timestamp)
        };
        let Some(candle) = completed else {
            return Ok(ControlFlow::Continue(()));
        };

        let position = self.get_position_bounded().await?;

        let decision = {
            let RunnerKind::Trend { evaluator, ring, .. } = &mut self.kind else { unreachable!() };
            ring.push(candle);
            let candles = ring.as_slice();
            evaluator.evaluate(tick.price, candles, position.as_ref())
        };
        self.bot.last_signal_at = Some(Utc::now());
        trace!(bot_id = %self.bot.id, action = ?decision.action, reason = %decision.reason, "strategy decision");

        match decision.action {
            TradeAction::Hold => {}
            TradeAction::Buy | TradeAction::Sell => {
                let side =
                    if decision.action == TradeAction::Buy { Side::Buy } else { Side::Sell };
                let RunnerKind::Trend { order_qty, .. } = &self.kind else { unreachable!() };
                let qty = decision.size.unwrap_or(*order_qty);
                if qty > 0.0 {
                    info!(
                        bot_id = %self.bot.id,
                        ?side,
                        qty,
                        confidence = decision.confidence,
                        reason = %decision.reason,
                        "placing strategy order"
                    );
                    self.place_bounded(side, qty, None).await?;
                }
            }
            TradeAction::Close => {
                if let Some(position) = position {
                    info!(
                        bot_id = %self.bot.id,
                        reason = %decision.reason,
                        size = position.size,
                        "closing position"
                    );
                    self.place_bounded(position.side.opposite(), position.size, None).await?;
                    self.record_close(&position, tick.price, &decision.reason).await;
                }
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    async fn record_close(&mut self, position: &PositionSnapshot, exit_price: f64, reason: &str) {
        let pnl = match position.side {
            Side::Buy => (exit_price - position.entry_price) * position.size,
            Side::Sell => (position.entry_price - exit_price) * position.size,
        };
        self.apply_trade_counters(pnl);

        let trade = TradeRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.bot.user_id,
            bot_id: Some(self.bot.id.clone()),
            symbol: self.bot.symbol.clone(),
            side: position.side.opposite(),
            qty: Decimal::from_f64_retain(position.size).unwrap_or_default(),
            entry_price: Decimal::from_f64_retain(position.entry_price).unwrap_or_default(),
            exit_price: Decimal::from_f64_retain(exit_price),
            pnl: Decimal::from_f64_retain(pnl).unwrap_or_default(),
            source: TradeSource::AiBot,
            opened_at: None,
            closed_at: Utc::now(),
        };
        if let Err(e) = self.store.record_trade(&trade).await {
            warn!(bot_id = %self.bot.id, "failed to record trade: {e:#}");
        }
        debug!(bot_id = %self.bot.id, pnl, reason, "trade closed");
    }

    async fn record_grid_cycle(&mut self, cycle: &GridCycle) {
        self.apply_trade_counters(cycle.profit);

        let trade = TradeRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.bot.user_id,
            bot_id: Some(self.bot.id.clone()),
            symbol: self.bot.symbol.clone(),
            side: Side::Sell,
            qty: Decimal::from_f64_retain(cycle.qty).unwrap_or_default(),
            entry_price: Decimal::from_f64_retain(cycle.buy_price).unwrap_or_default(),
            exit_price: Decimal::from_f64_retain(cycle.sell_price),
            pnl: Decimal::from_f64_retain(cycle.profit).unwrap_or_default(),
            source: TradeSource::GridBot,
            opened_at: None,
            closed_at: Utc::now(),
        };
        if let Err(e) = self.store.record_trade(&trade).await {
            warn!(bot_id = %self.bot.id, "failed to record grid trade: {e:#}");
        }
    }

    fn apply_trade_counters(&mut self, pnl: f64) {
        self.stats.trades.fetch_add(1, Ordering::SeqCst);
        self.bot.total_trades += 1;
        if pnl > 0.0 {
            self.bot.winning_trades += 1;
        }
        self.bot.total_pnl += pnl;
        self.bot.last_trade_at = Some(Utc::now());
    }

    async fn persist_grid(&self) {
        let RunnerKind::Grid { engine, .. } = &self.kind else { return };
        if let Err(e) = self.store.save_grid(engine.config(), engine.orders()).await {
            warn!(bot_id = %self.bot.id, "failed to persist grid state: {e:#}");
        }
    }

    async fn place_bounded(
        &self,
        side: Side,
        qty: f64,
        price: Option<f64>,
    ) -> Result<OrderRef> {
        let call = self.gateway.place_order(&self.bot.symbol, side, qty, price);
        match timeout(self.tuning.exchange_call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout.into()),
        }
    }

    async fn cancel_bounded(&self, order: &OrderRef) -> Result<()> {
        match timeout(self.tuning.exchange_call_timeout, self.gateway.cancel_order(order)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout.into()),
        }
    }

    async fn get_fills_bounded(&self, order: &OrderRef) -> Result<Option<FillEvent>> {
        match timeout(self.tuning.exchange_call_timeout, self.gateway.get_fills(order)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout.into()),
        }
    }

    async fn get_position_bounded(&self) -> Result<Option<PositionSnapshot>> {
        let call = self.gateway.get_position(&self.bot.symbol);
        match timeout(self.tuning.exchange_call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout.into()),
        }
    }

    /// Final cleanup on every exit path: persist counters and state, then
    /// release the admission slot.
    async fn finish(&mut self) {
        self.stats.running.store(false, Ordering::SeqCst);
        self.bot.is_running = false;
        self.bot.last_stopped_at = Some(Utc::now());

        self.persist_grid().await;
        if let Err(e) = self.store.save_bot(&self.bot).await {
            error!(bot_id = %self.bot.id, "failed to persist final bot state: {e:#}");
        }
        self.resources.stop_bot(self.bot.user_id, &self.bot.id);
        info!(
            bot_id = %self.bot.id,
            trades = self.bot.total_trades,
            pnl = self.bot.total_pnl,
            "bot loop finished"
        );
    }
}
