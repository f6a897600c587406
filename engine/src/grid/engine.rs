//! Per-level grid order state machine.
//!
//! Each level cycles `Pending → BuyPlaced → BuyFilled → SellPlaced →
//! SellFilled → Pending` while the bot is active. The engine itself only
//! decides; order placement is the orchestrator's job, reported back through
//! [`GridEngine::buy_placed`] / [`GridEngine::sell_placed`].

use crate::grid::levels;
use shared::models::{GridConfig, GridOrder, GridOrderStatus, ValidationError};
use tracing::{debug, info, warn};

/// What the orchestrator should do at the exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderIntent {
    PlaceBuy { grid_index: u32, price: f64, qty: f64 },
    PlaceSell { grid_index: u32, price: f64, qty: f64 },
    Cancel { order_id: String },
    /// Unwind a filled-but-unsold level at market (halt policy).
    MarketClose { grid_index: u32, qty: f64 },
}

/// What to do with partially completed levels when a stop price is breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaltPolicy {
    /// Leave bought inventory as an open position.
    #[default]
    LeaveOpen,
    /// Market-close bought inventory along with the cancellations.
    MarketClose,
}

/// Result of feeding one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GridStep {
    Idle,
    Place(Vec<OrderIntent>),
    /// Stop price breached: cancel everything, deactivate the bot. Takes
    /// priority over all per-level transitions.
    Halt(Vec<OrderIntent>),
}

/// A completed buy→sell cycle on one level.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCycle {
    pub grid_index: u32,
    pub buy_price: f64,
    pub sell_price: f64,
    pub qty: f64,
    pub profit: f64,
}

/// Result of applying one exchange fill.
#[derive(Debug, Default)]
pub struct FillOutcome {
    pub intents: Vec<OrderIntent>,
    pub completed: Option<GridCycle>,
}

pub struct GridEngine {
    config: GridConfig,
    orders: Vec<GridOrder>,
    level_prices: Vec<f64>,
    halt_policy: HaltPolicy,
    armed: bool,
    halted: bool,
    last_price: Option<f64>,
}

impl GridEngine {
    /// Build a fresh grid. Level prices are fixed here and never recomputed
    /// mid-cycle.
    pub fn new(config: GridConfig, halt_policy: HaltPolicy) -> Result<Self, ValidationError> {
        config.validate()?;
        let level_prices = levels::grid_prices(&config);
        let orders = level_prices
            .iter()
            .enumerate()
            .map(|(i, &price)| GridOrder::new(i as u32, price))
            .collect();
        // without a trigger price the grid arms immediately
        let armed = config.trigger_price.is_none();
        Ok(Self { config, orders, level_prices, halt_policy, armed, halted: false, last_price: None })
    }

    /// Rebuild from persisted state, keeping fill progress and counters.
    pub fn restore(
        config: GridConfig,
        orders: Vec<GridOrder>,
        halt_policy: HaltPolicy,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        if orders.len() != config.grid_count as usize {
            let mut engine = Self::new(config, halt_policy)?;
            warn!("persisted grid orders inconsistent, re-armed fresh");
            engine.armed = true;
            return Ok(engine);
        }
        let level_prices = orders.iter().map(|o| o.grid_price).collect();
        Ok(Self { config, orders, level_prices, halt_policy, armed: true, halted: false, last_price: None })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn orders(&self) -> &[GridOrder] {
        &self.orders
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Exchange order ids with an outstanding (placed, unfilled) order.
    pub fn outstanding_order_ids(&self) -> Vec<String> {
        self.orders
            .iter()
            .filter_map(|o| match o.status {
                GridOrderStatus::BuyPlaced => o.buy_order_id.clone(),
                GridOrderStatus::SellPlaced => o.sell_order_id.clone(),
                _ => None,
            })
            .collect()
    }

    /// Quote investment per level converted to base quantity at the level price.
    fn level_qty(&self, price: f64) -> f64 {
        self.config.total_investment / self.config.grid_count as f64 / price
    }

    /// Feed the current price. Halt protection runs first; otherwise levels
    /// whose price was crossed downward emit buy intents.
    pub fn on_tick(&mut self, price: f64) -> GridStep {
        if self.halted {
            return GridStep::Idle;
        }

        if let Some(intents) = self.check_halt(price) {
            return GridStep::Halt(intents);
        }

        if !self.armed {
            let triggered = self
                .config
                .trigger_price
                .map(|trigger| {
                    self.last_price
                        .map(|prev| (prev - trigger).signum() != (price - trigger).signum())
                        .unwrap_or(false)
                        || price == trigger
                })
                .unwrap_or(true);
            self.last_price = Some(price);
            if !triggered {
                return GridStep::Idle;
            }
            info!(bot_id = %self.config.bot_id, price, "grid trigger touched, arming");
            self.armed = true;
            return GridStep::Idle;
        }

        let previous = self.last_price.replace(price);
        let Some(previous) = previous else {
            return GridStep::Idle;
        };

        let mut intents = Vec::new();
        for order in &self.orders {
            if order.status != GridOrderStatus::Pending {
                continue;
            }
            let level = order.grid_price;
            // crossed down through the level, no order outstanding there
            if previous > level && price <= level {
                intents.push(OrderIntent::PlaceBuy {
                    grid_index: order.grid_index,
                    price: level,
                    qty: self.level_qty(level),
                });
            }
        }

        if intents.is_empty() {
            GridStep::Idle
        } else {
            GridStep::Place(intents)
        }
    }

    fn check_halt(&mut self, price: f64) -> Option<Vec<OrderIntent>> {
        let breached_upper = self.config.stop_upper.map(|s| price >= s).unwrap_or(false);
        let breached_lower = self.config.stop_lower.map(|s| price <= s).unwrap_or(false);
        if !breached_upper && !breached_lower {
            return None;
        }

        warn!(
            bot_id = %self.config.bot_id,
            price,
            "grid stop price breached, cancelling all outstanding orders"
        );
        self.halted = true;

        let mut intents: Vec<OrderIntent> = self
            .outstanding_order_ids()
            .into_iter()
            .map(|order_id| OrderIntent::Cancel { order_id })
            .collect();

        if self.halt_policy == HaltPolicy::MarketClose {
            for order in &self.orders {
                if order.status == GridOrderStatus::BuyFilled && order.filled_qty > 0.0 {
                    intents.push(OrderIntent::MarketClose {
                        grid_index: order.grid_index,
                        qty: order.filled_qty,
                    });
                }
            }
        }
        Some(intents)
    }

    /// Record that the buy intent for a level was accepted by the exchange.
    pub fn buy_placed(&mut self, grid_index: u32, order_id: String) {
        if let Some(order) = self.orders.get_mut(grid_index as usize) {
            debug_assert_eq!(order.status, GridOrderStatus::Pending);
            order.status = GridOrderStatus::BuyPlaced;
            order.buy_order_id = Some(order_id);
            self.config.active_buy_count += 1;
        }
    }

    /// Record that the sell intent for a level was accepted by the exchange.
    pub fn sell_placed(&mut self, grid_index: u32, order_id: String) {
        if let Some(order) = self.orders.get_mut(grid_index as usize) {
            debug_assert_eq!(order.status, GridOrderStatus::BuyFilled);
            order.status = GridOrderStatus::SellPlaced;
            order.sell_order_id = Some(order_id);
            self.config.active_sell_count += 1;
        }
    }

    /// Apply an exchange fill confirmation. A buy fill advances the level and
    /// emits the paired sell intent one level up; a sell fill realizes the
    /// cycle profit and re-arms the level.
    pub fn on_fill(&mut self, order_id: &str, price: f64, qty: f64, fee: f64) -> FillOutcome {
        let mut outcome = FillOutcome::default();
        if self.halted {
            return outcome;
        }

        let config = &self.config;
        let Some(order) = self.orders.iter_mut().find(|o| {
            o.buy_order_id.as_deref() == Some(order_id)
                || o.sell_order_id.as_deref() == Some(order_id)
        }) else {
            return outcome;
        };

        match order.status {
            GridOrderStatus::BuyPlaced if order.buy_order_id.as_deref() == Some(order_id) => {
                order.status = GridOrderStatus::BuyFilled;
                order.buy_fill_price = Some(price);
                order.filled_qty = qty;
                order.buy_fee = fee;
                order.buy_filled_at = Some(chrono::Utc::now());
                let sell_price = levels::next_level_up(config, order.grid_price);
                debug!(
                    grid_index = order.grid_index,
                    buy_price = price,
                    sell_price,
                    "grid buy filled, pairing sell one level up"
                );
                outcome.intents.push(OrderIntent::PlaceSell {
                    grid_index: order.grid_index,
                    price: sell_price,
                    qty,
                });
                self.config.active_buy_count = self.config.active_buy_count.saturating_sub(1);
                self.config.filled_buy_count += 1;
            }
            GridOrderStatus::SellPlaced if order.sell_order_id.as_deref() == Some(order_id) => {
                let buy_price = order.buy_fill_price.unwrap_or(order.grid_price);
                // fees from both sides of the cycle
                let profit = (price - buy_price) * qty - fee - order.buy_fee;
                order.sell_fill_price = Some(price);
                order.sell_filled_at = Some(chrono::Utc::now());
                order.realized_profit += profit;

                outcome.completed = Some(GridCycle {
                    grid_index: order.grid_index,
                    buy_price,
                    sell_price: price,
                    qty,
                    profit,
                });

                info!(
                    grid_index = order.grid_index,
                    profit, "grid cycle complete, level re-armed"
                );
                order.rearm();
                self.config.active_sell_count = self.config.active_sell_count.saturating_sub(1);
                self.config.filled_sell_count += 1;
                self.config.realized_profit += profit;
            }
            _ => {
                debug!(order_id, status = ?order.status, "ignoring fill for level in unexpected state");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::GridMode;

    fn config() -> GridConfig {
        GridConfig::new("bot", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 10_000.0)
    }

    fn engine() -> GridEngine {
        GridEngine::new(config(), HaltPolicy::default()).unwrap()
    }

    fn place_buy(engine: &mut GridEngine, from: f64, to: f64) -> (u32, f64, f64) {
        engine.on_tick(from);
        match engine.on_tick(to) {
            GridStep::Place(intents) => match &intents[0] {
                OrderIntent::PlaceBuy { grid_index, price, qty } => (*grid_index, *price, *qty),
                other => panic!("expected buy intent, got {other:?}"),
            },
            other => panic!("expected placement, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_creation() {
        let mut bad = config();
        bad.grid_count = 1;
        assert!(GridEngine::new(bad, HaltPolicy::default()).is_err());
    }

    #[test]
    fn test_cross_down_places_buy_at_level() {
        let mut engine = engine();
        // cross down through the 95,555.5 level (index 5)
        let (index, price, qty) = place_buy(&mut engine, 95_600.0, 95_500.0);
        assert_eq!(index, 5);
        assert!((price - (90_000.0 + 1_111.111111 * 5.0)).abs() < 0.01);
        // 1,000 quote per level at the level price
        assert!((qty - 1_000.0 / price).abs() < 1e-9);

        engine.buy_placed(index, "buy-1".into());
        assert_eq!(engine.orders()[index as usize].status, GridOrderStatus::BuyPlaced);
        assert_eq!(engine.config().active_buy_count, 1);

        // the same level does not re-fire while the order is outstanding
        engine.on_tick(95_600.0);
        assert_eq!(engine.on_tick(95_500.0), GridStep::Idle);
    }

    #[test]
    fn test_full_cycle_realizes_profit_and_rearms() {
        let mut engine = engine();
        let (index, level_price, qty) = place_buy(&mut engine, 95_600.0, 95_500.0);
        engine.buy_placed(index, "buy-1".into());

        let outcome = engine.on_fill("buy-1", level_price, qty, 0.5);
        assert!(outcome.completed.is_none());
        let sell_price = match &outcome.intents[0] {
            OrderIntent::PlaceSell { price, .. } => *price,
            other => panic!("expected sell intent, got {other:?}"),
        };
        assert!((sell_price - (level_price + 1_111.111111)).abs() < 0.01);
        assert_eq!(engine.orders()[index as usize].status, GridOrderStatus::BuyFilled);

        engine.sell_placed(index, "sell-1".into());
        // buy and sell are never outstanding together on one level
        assert_eq!(engine.outstanding_order_ids(), vec!["sell-1".to_string()]);

        let outcome = engine.on_fill("sell-1", sell_price, qty, 0.5);
        let cycle = outcome.completed.expect("cycle complete");
        // buy fee and sell fee both come out of the cycle
        let expected = (sell_price - level_price) * qty - 0.5 - 0.5;
        assert!((cycle.profit - expected).abs() < 1e-9);

        // cyclic: the level is pending again with counters advanced
        let order = &engine.orders()[index as usize];
        assert_eq!(order.status, GridOrderStatus::Pending);
        assert!(order.buy_order_id.is_none());
        assert_eq!(engine.config().filled_buy_count, 1);
        assert_eq!(engine.config().filled_sell_count, 1);
        assert!((engine.config().realized_profit - expected).abs() < 1e-9);
    }

    #[test]
    fn test_halt_cancels_everything_and_sticks() {
        let mut cfg = config();
        cfg.stop_lower = Some(91_000.0);
        let mut engine = GridEngine::new(cfg, HaltPolicy::default()).unwrap();

        let (index, _, _) = place_buy(&mut engine, 95_600.0, 95_500.0);
        engine.buy_placed(index, "buy-1".into());

        let step = engine.on_tick(90_500.0);
        match step {
            GridStep::Halt(intents) => {
                assert_eq!(intents, vec![OrderIntent::Cancel { order_id: "buy-1".into() }]);
            }
            other => panic!("expected halt, got {other:?}"),
        }
        assert!(engine.is_halted());
        // everything after the halt is inert
        assert_eq!(engine.on_tick(95_000.0), GridStep::Idle);
        assert!(engine.on_fill("buy-1", 95_000.0, 0.1, 0.0).intents.is_empty());
    }

    #[test]
    fn test_halt_market_closes_filled_levels_when_configured() {
        let mut cfg = config();
        cfg.stop_lower = Some(91_000.0);
        let mut engine = GridEngine::new(cfg, HaltPolicy::MarketClose).unwrap();

        let (index, level_price, qty) = place_buy(&mut engine, 95_600.0, 95_500.0);
        engine.buy_placed(index, "buy-1".into());
        engine.on_fill("buy-1", level_price, qty, 0.0);

        match engine.on_tick(90_500.0) {
            GridStep::Halt(intents) => {
                assert!(intents
                    .iter()
                    .any(|i| matches!(i, OrderIntent::MarketClose { grid_index, .. } if *grid_index == index)));
            }
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn test_trigger_price_keeps_grid_dormant() {
        let mut cfg = config();
        cfg.trigger_price = Some(93_000.0);
        let mut engine = GridEngine::new(cfg, HaltPolicy::default()).unwrap();

        // crossing levels while dormant places nothing
        engine.on_tick(95_600.0);
        assert_eq!(engine.on_tick(95_500.0), GridStep::Idle);

        // touching the trigger arms the grid; the next cross places
        assert_eq!(engine.on_tick(92_900.0), GridStep::Idle);
        engine.on_tick(93_400.0);
        match engine.on_tick(93_300.0) {
            GridStep::Place(intents) => assert_eq!(intents.len(), 1),
            other => panic!("expected placement, got {other:?}"),
        }
    }
}
