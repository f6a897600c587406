//! Integration tests: orchestrator lifecycle against the paper exchange and
//! the in-memory store.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use engine::error::EngineError;
use engine::exchange::{
    ExchangeError, ExchangeGateway, FillEvent, OrderRef, PaperExchange, PositionSnapshot,
};
use engine::grid::HaltPolicy;
use engine::orchestrator::{BotOrchestrator, BotRunConfig, EngineTuning};
use engine::resource::{ResourceController, ResourceLimits};
use engine::store::{BotStore, MemoryStore};
use engine::stream::{Tick, TickQueue};
use serde_json::json;
use shared::models::{BotInstance, BotType, GridConfig, GridMode, Side};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const SYMBOL: &str = "BTC/USDT";

fn fast_tuning() -> EngineTuning {
    EngineTuning {
        tick_timeout: Duration::from_millis(100),
        max_consecutive_errors: 3,
        stop_grace: Duration::from_secs(2),
        exchange_call_timeout: Duration::from_secs(1),
        candle_history: 240,
    }
}

fn bot(id: &str, user_id: i64) -> BotInstance {
    BotInstance::new(id, user_id, BotType::Grid, SYMBOL)
}

fn grid_run_config() -> BotRunConfig {
    BotRunConfig::Grid {
        config: GridConfig::new("grid-1", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 10_000.0),
        halt_policy: HaltPolicy::default(),
    }
}

fn trend_run_config() -> BotRunConfig {
    // shortened periods so signals form within a handful of candles
    BotRunConfig::Trend {
        strategy: "trend".to_string(),
        params: json!({
            "min_candles": 5,
            "entry_threshold": 3.0,
            "indicators": {
                "ema_fast": 3,
                "ema_slow": 5,
                "ema_trend": 8,
                "rsi_length": 3,
                "atr_length": 3,
                "volume_window": 3,
                "macd_fast": 3,
                "macd_slow": 6,
                "macd_signal": 3
            }
        }),
        order_qty: 0.5,
        timeframe_secs: 1,
    }
}

struct Harness {
    orchestrator: BotOrchestrator,
    gateway: Arc<PaperExchange>,
    store: Arc<MemoryStore>,
    resources: Arc<ResourceController>,
    queue: Arc<TickQueue>,
}

fn harness(limits: ResourceLimits) -> Harness {
    let gateway = Arc::new(PaperExchange::new(0.0));
    let store = Arc::new(MemoryStore::new());
    let resources = Arc::new(ResourceController::new(limits));
    let orchestrator = BotOrchestrator::new(
        resources.clone(),
        gateway.clone(),
        store.clone(),
        fast_tuning(),
    );
    let queue = Arc::new(TickQueue::new(100));
    Harness { orchestrator, gateway, store, resources, queue }
}

impl Harness {
    /// Mark the paper price, then deliver the tick and let the bot process it.
    async fn step(&self, price: f64, at_secs: i64) {
        self.gateway.mark_price(SYMBOL, price);
        let timestamp = Utc.timestamp_opt(1_700_000_000 + at_secs, 0).single().unwrap();
        self.queue.push(Tick::new(SYMBOL, price, 1.0, timestamp));
        sleep(Duration::from_millis(150)).await;
    }
}

#[tokio::test]
async fn test_admission_denied_surfaces_limiting_rule() {
    let harness = harness(ResourceLimits {
        max_concurrent_bots_per_user: 1,
        ..ResourceLimits::default()
    });

    harness
        .orchestrator
        .start(bot("grid-1", 1), grid_run_config(), harness.queue.clone())
        .await
        .expect("first bot starts");

    let err = harness
        .orchestrator
        .start(bot("grid-2", 1), grid_run_config(), harness.queue.clone())
        .await
        .expect_err("second bot for the same user is denied");
    match err {
        EngineError::AdmissionDenied(reason) => {
            assert!(reason.contains("Max concurrent bots per user"));
        }
        other => panic!("expected admission denial, got {other:?}"),
    }

    // a different user is unaffected
    harness
        .orchestrator
        .start(bot("grid-3", 2), grid_run_config(), harness.queue.clone())
        .await
        .expect("other user starts");

    harness.orchestrator.stop(1, "grid-1").await.unwrap();
    harness.orchestrator.stop(2, "grid-3").await.unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_is_noop() {
    let harness = harness(ResourceLimits::default());

    harness
        .orchestrator
        .start(bot("grid-1", 1), grid_run_config(), harness.queue.clone())
        .await
        .unwrap();
    // second start of the same bot must not spawn a second task
    harness
        .orchestrator
        .start(bot("grid-1", 1), grid_run_config(), harness.queue.clone())
        .await
        .unwrap();
    assert_eq!(harness.orchestrator.registered_bots().await.len(), 1);
    assert_eq!(harness.resources.get_user_stats(1).active_bots, 1);

    assert!(harness.orchestrator.is_running("grid-1").await);
    harness.orchestrator.stop(1, "grid-1").await.unwrap();
    assert!(!harness.orchestrator.is_running("grid-1").await);
    // slot released, stop again is a no-op
    assert_eq!(harness.resources.get_user_stats(1).active_bots, 0);
    harness.orchestrator.stop(1, "grid-1").await.unwrap();
}

#[tokio::test]
async fn test_grid_bot_runs_a_full_cycle() {
    let harness = harness(ResourceLimits::default());
    harness
        .orchestrator
        .start(bot("grid-1", 1), grid_run_config(), harness.queue.clone())
        .await
        .unwrap();

    // walk the price down through the 95,555.56 level: buy placed
    harness.step(95_600.0, 0).await;
    harness.step(95_500.0, 1).await;
    // next mark crosses the buy limit: fill observed, sell placed one level up
    harness.step(95_400.0, 2).await;
    // rally through the sell level: cycle completes
    harness.step(96_700.0, 3).await;
    harness.step(96_700.0, 4).await;

    let status = harness.orchestrator.status("grid-1").await.expect("status");
    assert!(status.is_running);
    assert!(status.total_ticks >= 4);
    assert_eq!(status.trades, 1);

    let trades = harness.store.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].source, shared::models::TradeSource::GridBot);

    harness.orchestrator.stop(1, "grid-1").await.unwrap();

    // final counters persisted at stop
    let saved = harness.store.bot("grid-1").expect("bot persisted");
    assert!(!saved.is_running);
    assert_eq!(saved.total_trades, 1);
    assert!(saved.total_pnl > 0.0);
    let (grid, orders) = harness.store.load_grid("grid-1").await.unwrap().expect("grid persisted");
    assert_eq!(grid.filled_buy_count, 1);
    assert_eq!(grid.filled_sell_count, 1);
    assert!(grid.realized_profit > 0.0);
    assert_eq!(orders.len(), 10);
}

#[tokio::test]
async fn test_trend_bot_enters_on_signal() {
    let harness = harness(ResourceLimits::default());
    harness
        .orchestrator
        .start(bot("trend-1", 7), trend_run_config(), harness.queue.clone())
        .await
        .unwrap();

    // one rising candle per second; each new window closes the previous candle
    for i in 0..12 {
        harness.step(100.0 + i as f64, i).await;
    }

    let position = harness.gateway.get_position(SYMBOL).await.unwrap();
    let position = position.expect("entry order filled");
    assert_eq!(position.side, Side::Buy);
    assert!(position.size >= 0.5);

    harness.orchestrator.stop(7, "trend-1").await.unwrap();
}

/// Gateway where every call fails with a connectivity error.
struct FailingGateway;

#[async_trait]
impl ExchangeGateway for FailingGateway {
    async fn place_order(
        &self,
        _: &str,
        _: Side,
        _: f64,
        _: Option<f64>,
    ) -> Result<OrderRef, ExchangeError> {
        Err(ExchangeError::Connectivity("exchange unreachable".into()))
    }

    async fn cancel_order(&self, _: &OrderRef) -> Result<(), ExchangeError> {
        Err(ExchangeError::Connectivity("exchange unreachable".into()))
    }

    async fn get_fills(&self, _: &OrderRef) -> Result<Option<FillEvent>, ExchangeError> {
        Err(ExchangeError::Connectivity("exchange unreachable".into()))
    }

    async fn get_position(&self, _: &str) -> Result<Option<PositionSnapshot>, ExchangeError> {
        Err(ExchangeError::Connectivity("exchange unreachable".into()))
    }
}

#[tokio::test]
async fn test_consecutive_errors_stop_the_bot() {
    let store = Arc::new(MemoryStore::new());
    let resources = Arc::new(ResourceController::new(ResourceLimits::default()));
    let orchestrator = BotOrchestrator::new(
        resources.clone(),
        Arc::new(FailingGateway),
        store.clone(),
        fast_tuning(),
    );
    let queue = Arc::new(TickQueue::new(100));

    orchestrator
        .start(bot("trend-err", 1), trend_run_config(), queue.clone())
        .await
        .unwrap();

    // every completed candle hits the failing gateway; the threshold is 3
    for i in 0..6 {
        let timestamp = Utc.timestamp_opt(1_700_000_000 + i, 0).single().unwrap();
        queue.push(Tick::new(SYMBOL, 100.0 + i as f64, 1.0, timestamp));
        sleep(Duration::from_millis(120)).await;
    }
    sleep(Duration::from_millis(300)).await;

    assert!(!orchestrator.is_running("trend-err").await);
    let status = orchestrator.status("trend-err").await.expect("status for stopped bot");
    assert!(!status.is_running);
    let last_error = status.last_error.expect("last error recorded");
    assert!(last_error.contains("consecutive errors"));

    // state persisted and the admission slot released
    let saved = store.bot("trend-err").expect("bot persisted");
    assert!(!saved.is_running);
    assert!(saved.last_error.is_some());
    assert_eq!(resources.get_user_stats(1).active_bots, 0);

    // an explicit restart replaces the stale handle and clears the error
    orchestrator
        .start(bot("trend-err", 1), trend_run_config(), queue.clone())
        .await
        .expect("explicit restart allowed");
    assert!(orchestrator.is_running("trend-err").await);
    let saved = store.bot("trend-err").expect("bot persisted");
    assert_eq!(saved.restart_count, 1);
    assert!(saved.last_error.is_none());

    orchestrator.stop(1, "trend-err").await.unwrap();
}

#[tokio::test]
async fn test_grid_halt_deactivates_bot() {
    let harness = harness(ResourceLimits::default());
    let config = BotRunConfig::Grid {
        config: {
            let mut c =
                GridConfig::new("grid-halt", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 10_000.0);
            c.stop_lower = Some(91_000.0);
            c
        },
        halt_policy: HaltPolicy::default(),
    };
    harness.orchestrator.start(bot("grid-halt", 1), config, harness.queue.clone()).await.unwrap();

    harness.step(95_600.0, 0).await;
    harness.step(95_500.0, 1).await;
    // breach the lower stop: the grid cancels everything and the bot stops
    harness.step(90_500.0, 2).await;
    sleep(Duration::from_millis(200)).await;

    assert!(!harness.orchestrator.is_running("grid-halt").await);
    let saved = harness.store.bot("grid-halt").expect("bot persisted");
    assert!(!saved.is_active);
    assert_eq!(harness.resources.get_user_stats(1).active_bots, 0);
}
