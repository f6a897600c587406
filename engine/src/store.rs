//! Persistence collaborator interface.
//!
//! The engine treats storage as a durable row store keyed by id with plain
//! update semantics: bot state is read at start and written back at
//! stop/error, grids after fills, trades on completion. The real
//! implementation lives outside the engine; [`MemoryStore`] backs tests and
//! paper sessions.

use anyhow::Result;
use async_trait::async_trait;
use shared::models::{BotInstance, GridConfig, GridOrder, TradeRecord};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait BotStore: Send + Sync {
    async fn load_bot(&self, bot_id: &str) -> Result<Option<BotInstance>>;

    async fn save_bot(&self, bot: &BotInstance) -> Result<()>;

    async fn load_grid(&self, bot_id: &str) -> Result<Option<(GridConfig, Vec<GridOrder>)>>;

    async fn save_grid(&self, config: &GridConfig, orders: &[GridOrder]) -> Result<()>;

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()>;
}

/// In-memory [`BotStore`].
#[derive(Default)]
pub struct MemoryStore {
    bots: Mutex<HashMap<String, BotInstance>>,
    grids: Mutex<HashMap<String, (GridConfig, Vec<GridOrder>)>>,
    trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    pub fn bot(&self, bot_id: &str) -> Option<BotInstance> {
        self.bots.lock().unwrap().get(bot_id).cloned()
    }
}

#[async_trait]
impl BotStore for MemoryStore {
    async fn load_bot(&self, bot_id: &str) -> Result<Option<BotInstance>> {
        Ok(self.bots.lock().unwrap().get(bot_id).cloned())
    }

    async fn save_bot(&self, bot: &BotInstance) -> Result<()> {
        self.bots.lock().unwrap().insert(bot.id.clone(), bot.clone());
        Ok(())
    }

    async fn load_grid(&self, bot_id: &str) -> Result<Option<(GridConfig, Vec<GridOrder>)>> {
        Ok(self.grids.lock().unwrap().get(bot_id).cloned())
    }

    async fn save_grid(&self, config: &GridConfig, orders: &[GridOrder]) -> Result<()> {
        self.grids
            .lock()
            .unwrap()
            .insert(config.bot_id.clone(), (config.clone(), orders.to_vec()));
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }
}
