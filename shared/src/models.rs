//! Domain models shared between the engine and its collaborators.
//!
//! These are the rows the persistence collaborator stores: bot instances,
//! grid configurations, per-level grid orders and completed trades. The
//! engine owns them exclusively while a bot is running; persistence only
//! sees them at start/stop/error boundaries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound for `GridConfig::grid_count`.
pub const MIN_GRID_COUNT: u32 = 2;
/// Upper bound for `GridConfig::grid_count`.
pub const MAX_GRID_COUNT: u32 = 200;

/// Bot discriminator. Serialized as `"ai_trend"` / `"grid"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    AiTrend,
    Grid,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::AiTrend => "ai_trend",
            BotType::Grid => "grid",
        }
    }
}

/// Grid spacing mode: equal absolute spacing vs equal ratio spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    Arithmetic,
    Geometric,
}

/// Lifecycle of one grid level. The machine is cyclic: after `SellFilled`
/// the level re-arms back to `Pending` for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridOrderStatus {
    Pending,
    BuyPlaced,
    BuyFilled,
    SellPlaced,
    SellFilled,
}

/// Where a trade originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSource {
    Manual,
    AiBot,
    GridBot,
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// One user-owned bot. Mutated only by its own running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInstance {
    pub id: String,
    pub user_id: i64,
    pub bot_type: BotType,
    pub symbol: String,
    pub max_leverage: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub is_running: bool,
    pub is_active: bool,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub total_pnl: f64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl BotInstance {
    pub fn new(id: impl Into<String>, user_id: i64, bot_type: BotType, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id,
            bot_type,
            symbol: symbol.into(),
            max_leverage: 1.0,
            stop_loss_percent: 1.5,
            take_profit_percent: 3.0,
            is_running: false,
            is_active: true,
            total_trades: 0,
            winning_trades: 0,
            total_pnl: 0.0,
            last_started_at: None,
            last_stopped_at: None,
            last_trade_at: None,
            last_signal_at: None,
            last_error: None,
            restart_count: 0,
            last_restart_at: None,
        }
    }
}

/// Validation failures for grid parameters. Rejected at creation time,
/// never allowed to reach a running bot.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("upper_price must be greater than lower_price")]
    PriceBounds,
    #[error("grid_count must be between {MIN_GRID_COUNT} and {MAX_GRID_COUNT}")]
    GridCount,
    #[error("prices must be positive")]
    NonPositivePrice,
    #[error("total_investment must be positive")]
    Investment,
}

/// Grid parameters and running counters, bound 1:1 to a grid bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub bot_id: String,
    pub lower_price: f64,
    pub upper_price: f64,
    pub grid_count: u32,
    pub mode: GridMode,
    pub total_investment: f64,
    pub trigger_price: Option<f64>,
    pub stop_upper: Option<f64>,
    pub stop_lower: Option<f64>,
    pub active_buy_count: u32,
    pub active_sell_count: u32,
    pub filled_buy_count: u32,
    pub filled_sell_count: u32,
    pub realized_profit: f64,
}

impl GridConfig {
    pub fn new(
        bot_id: impl Into<String>,
        lower_price: f64,
        upper_price: f64,
        grid_count: u32,
        mode: GridMode,
        total_investment: f64,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            lower_price,
            upper_price,
            grid_count,
            mode,
            total_investment,
            trigger_price: None,
            stop_upper: None,
            stop_lower: None,
            active_buy_count: 0,
            active_sell_count: 0,
            filled_buy_count: 0,
            filled_sell_count: 0,
            realized_profit: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lower_price <= 0.0 || self.upper_price <= 0.0 {
            return Err(ValidationError::NonPositivePrice);
        }
        if self.upper_price <= self.lower_price {
            return Err(ValidationError::PriceBounds);
        }
        if self.grid_count < MIN_GRID_COUNT || self.grid_count > MAX_GRID_COUNT {
            return Err(ValidationError::GridCount);
        }
        if self.total_investment <= 0.0 {
            return Err(ValidationError::Investment);
        }
        Ok(())
    }
}

/// One order slot per grid level. Never deleted while the bot is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOrder {
    pub grid_index: u32,
    pub grid_price: f64,
    pub status: GridOrderStatus,
    pub buy_order_id: Option<String>,
    pub sell_order_id: Option<String>,
    pub buy_fill_price: Option<f64>,
    pub sell_fill_price: Option<f64>,
    pub filled_qty: f64,
    /// Fee paid on the buy side, settled against the cycle profit.
    #[serde(default)]
    pub buy_fee: f64,
    pub buy_filled_at: Option<DateTime<Utc>>,
    pub sell_filled_at: Option<DateTime<Utc>>,
    pub realized_profit: f64,
}

impl GridOrder {
    pub fn new(grid_index: u32, grid_price: f64) -> Self {
        Self {
            grid_index,
            grid_price,
            status: GridOrderStatus::Pending,
            buy_order_id: None,
            sell_order_id: None,
            buy_fill_price: None,
            sell_fill_price: None,
            filled_qty: 0.0,
            buy_fee: 0.0,
            buy_filled_at: None,
            sell_filled_at: None,
            realized_profit: 0.0,
        }
    }

    /// Re-arm the level for the next buy/sell cycle. The grid price and the
    /// accumulated profit stay; everything cycle-specific is cleared.
    pub fn rearm(&mut self) {
        self.status = GridOrderStatus::Pending;
        self.buy_order_id = None;
        self.sell_order_id = None;
        self.buy_fill_price = None;
        self.sell_fill_price = None;
        self.filled_qty = 0.0;
        self.buy_fee = 0.0;
        self.buy_filled_at = None;
        self.sell_filled_at = None;
    }
}

/// A completed round-trip trade, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: i64,
    pub bot_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub pnl: Decimal,
    pub source: TradeSource,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GridConfig {
        GridConfig::new("bot-1", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 1_000.0)
    }

    #[test]
    fn test_grid_config_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_grid_config_rejects_inverted_bounds() {
        let mut config = valid_config();
        config.upper_price = config.lower_price;
        assert_eq!(config.validate(), Err(ValidationError::PriceBounds));
    }

    #[test]
    fn test_grid_config_rejects_bad_count() {
        let mut config = valid_config();
        config.grid_count = 1;
        assert_eq!(config.validate(), Err(ValidationError::GridCount));
        config.grid_count = 201;
        assert_eq!(config.validate(), Err(ValidationError::GridCount));
    }

    #[test]
    fn test_grid_order_rearm_clears_cycle_state() {
        let mut order = GridOrder::new(3, 95_000.0);
        order.status = GridOrderStatus::SellFilled;
        order.buy_order_id = Some("b".into());
        order.sell_order_id = Some("s".into());
        order.filled_qty = 0.5;
        order.realized_profit = 12.5;
        order.rearm();
        assert_eq!(order.status, GridOrderStatus::Pending);
        assert!(order.buy_order_id.is_none());
        assert!(order.sell_order_id.is_none());
        assert_eq!(order.filled_qty, 0.0);
        // profit survives re-arming
        assert_eq!(order.realized_profit, 12.5);
    }

    #[test]
    fn test_discriminator_serialization() {
        assert_eq!(serde_json::to_string(&BotType::AiTrend).unwrap(), "\"ai_trend\"");
        assert_eq!(serde_json::to_string(&GridMode::Geometric).unwrap(), "\"geometric\"");
        assert_eq!(serde_json::to_string(&GridOrderStatus::BuyPlaced).unwrap(), "\"buy_placed\"");
        assert_eq!(serde_json::to_string(&TradeSource::GridBot).unwrap(), "\"grid_bot\"");
    }
}
