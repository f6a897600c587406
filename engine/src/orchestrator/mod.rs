//! Bot orchestration.
//!
//! Owns the registry of running bots: one supervised tokio task per bot,
//! admission-checked against the [`ResourceController`], cancelled
//! cooperatively through a watch signal. A bot that exceeds the
//! consecutive-error threshold stops itself and stays stopped until an
//! explicit restart.

pub mod runner;

use crate::error::EngineError;
use crate::exchange::ExchangeGateway;
use crate::grid::{GridEngine, HaltPolicy};
use crate::orchestrator::runner::{BotRunner, RunnerKind};
use crate::resource::ResourceController;
use crate::store::BotStore;
use crate::strategy::{OverlayEvaluator, PredictionOverlay, StrategyRegistry};
use crate::stream::TickQueue;
use crate::data::{CandleAggregator, CandleRing};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::models::{BotInstance, BotType, GridConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Loop tuning shared by every bot task.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// How long a bot waits on its tick queue before an idle pass.
    pub tick_timeout: Duration,
    /// Consecutive failed ticks before the bot auto-stops.
    pub max_consecutive_errors: u32,
    /// How long `stop()` waits for a bot task before aborting it.
    pub stop_grace: Duration,
    /// Bound on every exchange-gateway await.
    pub exchange_call_timeout: Duration,
    /// Candle history kept per trend bot.
    pub candle_history: usize,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            tick_timeout: Duration::from_secs(30),
            max_consecutive_errors: 10,
            stop_grace: Duration::from_secs(5),
            exchange_call_timeout: Duration::from_secs(10),
            candle_history: 240,
        }
    }
}

impl EngineTuning {
    pub fn from_config(config: &shared::Config) -> Self {
        Self {
            tick_timeout: Duration::from_secs(config.engine_tick_timeout_secs),
            max_consecutive_errors: config.engine_max_consecutive_errors,
            stop_grace: Duration::from_secs(config.engine_stop_grace_secs),
            exchange_call_timeout: Duration::from_secs(config.engine_exchange_call_timeout_secs),
            ..Self::default()
        }
    }
}

/// Per-bot run configuration supplied at start.
pub enum BotRunConfig {
    Grid {
        config: GridConfig,
        halt_policy: HaltPolicy,
    },
    Trend {
        /// Registered strategy code, e.g. `"trend"` or `"role_division"`.
        strategy: String,
        params: Value,
        /// Base order quantity for entries without an explicit size.
        order_qty: f64,
        timeframe_secs: u64,
    },
}

impl BotRunConfig {
    fn bot_type(&self) -> BotType {
        match self {
            BotRunConfig::Grid { .. } => BotType::Grid,
            BotRunConfig::Trend { .. } => BotType::AiTrend,
        }
    }
}

/// Live counters shared between a bot task and status readers. Reads are
/// eventually-consistent snapshots.
pub struct BotStats {
    pub(crate) running: AtomicBool,
    pub(crate) total_ticks: AtomicU64,
    pub(crate) trades: AtomicU64,
    pub(crate) consecutive_errors: AtomicU32,
    pub(crate) last_error: Mutex<Option<String>>,
    pub(crate) started_at: DateTime<Utc>,
}

impl BotStats {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            total_ticks: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            last_error: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub(crate) fn set_last_error(&self, message: String) {
        *self.last_error.lock().unwrap() = Some(message);
    }

    fn snapshot(&self) -> BotStatusSnapshot {
        BotStatusSnapshot {
            is_running: self.running.load(Ordering::SeqCst),
            total_ticks: self.total_ticks.load(Ordering::SeqCst),
            trades: self.trades.load(Ordering::SeqCst),
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            last_error: self.last_error.lock().unwrap().clone(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0),
        }
    }
}

/// Point-in-time bot status.
#[derive(Debug, Clone)]
pub struct BotStatusSnapshot {
    pub is_running: bool,
    pub total_ticks: u64,
    pub trades: u64,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

struct BotHandle {
    user_id: i64,
    stats: Arc<BotStats>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The registry of running bots.
pub struct BotOrchestrator {
    bots: RwLock<HashMap<String, BotHandle>>,
    resources: Arc<ResourceController>,
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn BotStore>,
    registry: StrategyRegistry,
    overlay: Option<Arc<dyn PredictionOverlay>>,
    tuning: EngineTuning,
}

impl BotOrchestrator {
    pub fn new(
        resources: Arc<ResourceController>,
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn BotStore>,
        tuning: EngineTuning,
    ) -> Self {
        Self {
            bots: RwLock::new(HashMap::new()),
            resources,
            gateway,
            store,
            registry: StrategyRegistry::new(),
            overlay: None,
            tuning,
        }
    }

    /// Attach a prediction overlay; trend evaluators get decorated with it.
    pub fn with_overlay(mut self, overlay: Arc<dyn PredictionOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Start a bot. Denied starts surface the limiting rule verbatim; a
    /// start for an already-running bot is an idempotent no-op.
    pub async fn start(
        &self,
        bot: BotInstance,
        config: BotRunConfig,
        ticks: Arc<TickQueue>,
    ) -> Result<(), EngineError> {
        let mut bots = self.bots.write().await;

        if let Some(handle) = bots.get(&bot.id) {
            if !handle.task.is_finished() {
                debug!(bot_id = %bot.id, "start ignored, bot already running");
                return Ok(());
            }
            // stale handle from an auto-stopped bot; explicit restart replaces it
            bots.remove(&bot.id);
        }

        let (allowed, reason) = self.resources.can_start_bot(bot.user_id);
        if !allowed {
            return Err(EngineError::AdmissionDenied(reason.unwrap_or_default()));
        }

        // pick up persisted lifetime counters, if any
        let mut bot = bot;
        if let Ok(Some(saved)) = self.store.load_bot(&bot.id).await {
            bot.total_trades = saved.total_trades;
            bot.winning_trades = saved.winning_trades;
            bot.total_pnl = saved.total_pnl;
            bot.restart_count = saved.restart_count;
            bot.last_error = saved.last_error;
            bot.last_trade_at = saved.last_trade_at;
        }
        if bot.last_error.is_some() {
            bot.restart_count += 1;
            bot.last_restart_at = Some(Utc::now());
            bot.last_error = None;
        }
        bot.bot_type = config.bot_type();
        bot.is_running = true;
        bot.is_active = true;
        bot.last_started_at = Some(Utc::now());

        let kind = match config {
            BotRunConfig::Grid { config: grid_config, halt_policy } => {
                let engine = match self.store.load_grid(&bot.id).await {
                    Ok(Some((saved_config, orders))) => {
                        GridEngine::restore(saved_config, orders, halt_policy)?
                    }
                    _ => GridEngine::new(grid_config, halt_policy)?,
                };
                RunnerKind::Grid { engine, refs: HashMap::new() }
            }
            BotRunConfig::Trend { strategy, params, order_qty, timeframe_secs } => {
                let mut evaluator = self.registry.create(&strategy, &params)?;
                if let Some(overlay) = &self.overlay {
                    evaluator =
                        Box::new(OverlayEvaluator::new(evaluator, overlay.clone(), &bot.symbol));
                }
                RunnerKind::Trend {
                    evaluator,
                    ring: CandleRing::new(self.tuning.candle_history),
                    aggregator: CandleAggregator::new(timeframe_secs),
                    order_qty,
                }
            }
        };

        self.resources.start_bot(bot.user_id, &bot.id);
        if let Err(e) = self.store.save_bot(&bot).await {
            self.resources.stop_bot(bot.user_id, &bot.id);
            return Err(EngineError::Internal(e));
        }

        let stats = Arc::new(BotStats::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let bot_id = bot.id.clone();
        let user_id = bot.user_id;

        let runner = BotRunner {
            bot,
            kind,
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            resources: self.resources.clone(),
            ticks,
            stats: stats.clone(),
            tuning: self.tuning.clone(),
        };
        let task = tokio::spawn(runner.run(stop_rx));

        info!(bot_id = %bot_id, user_id, "🚀 bot started");
        bots.insert(bot_id, BotHandle { user_id, stats, stop_tx, task });
        Ok(())
    }

    /// Stop a bot: signal cancellation, await the task within the grace
    /// period, abort past it. Stopping a non-running bot is a no-op.
    pub async fn stop(&self, user_id: i64, bot_id: &str) -> Result<()> {
        let handle = {
            let mut bots = self.bots.write().await;
            let owned_by_caller = bots.get(bot_id).map(|h| h.user_id == user_id).unwrap_or(false);
            if owned_by_caller {
                bots.remove(bot_id)
            } else {
                None
            }
        };
        let Some(handle) = handle else {
            debug!(bot_id, "stop ignored, bot not running");
            return Ok(());
        };

        let _ = handle.stop_tx.send(true);
        let mut task = handle.task;
        if timeout(self.tuning.stop_grace, &mut task).await.is_err() {
            warn!(bot_id, "bot did not stop within grace period, aborting");
            task.abort();
            // the runner's own cleanup was cut short
            self.resources.stop_bot(user_id, bot_id);
        }
        info!(bot_id, user_id, "🛑 bot stopped");
        Ok(())
    }

    pub async fn is_running(&self, bot_id: &str) -> bool {
        let bots = self.bots.read().await;
        bots.get(bot_id)
            .map(|h| !h.task.is_finished() && h.stats.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub async fn status(&self, bot_id: &str) -> Option<BotStatusSnapshot> {
        let bots = self.bots.read().await;
        bots.get(bot_id).map(|h| h.stats.snapshot())
    }

    /// Ids of all registered bots (running or auto-stopped but not yet
    /// restarted).
    pub async fn registered_bots(&self) -> Vec<String> {
        self.bots.read().await.keys().cloned().collect()
    }
}
