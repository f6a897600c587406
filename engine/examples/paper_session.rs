//! Paper trading session: a grid bot and a trend bot running against the
//! in-memory paper exchange on a synthetic oscillating market.
//!
//! Run with: cargo run --example paper_session

use chrono::Utc;
use engine::prelude::*;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const SYMBOL: &str = "BTC/USDT";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = shared::Config::from_env()?;
    let limits = ResourceLimits {
        max_concurrent_backtests_per_user: config.max_concurrent_backtests_per_user,
        max_total_concurrent_backtests: config.max_total_concurrent_backtests,
        max_daily_backtests_per_user: config.max_daily_backtests_per_user,
        max_concurrent_bots_per_user: config.max_concurrent_bots_per_user,
        max_total_concurrent_bots: config.max_total_concurrent_bots,
    };

    let resources = Arc::new(ResourceController::new(limits));
    let gateway = Arc::new(PaperExchange::new(0.0004));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = BotOrchestrator::new(
        resources.clone(),
        gateway.clone(),
        store.clone(),
        EngineTuning::from_config(&config),
    );

    // one intake queue per bot subscription
    let grid_queue = Arc::new(TickQueue::new(config.stream_queue_capacity));
    let trend_queue = Arc::new(TickQueue::new(config.stream_queue_capacity));

    let grid_config = {
        let mut c =
            GridConfig::new("grid-demo", 94_000.0, 97_000.0, 12, GridMode::Arithmetic, 12_000.0);
        c.stop_lower = Some(92_000.0);
        c
    };
    orchestrator
        .start(
            BotInstance::new("grid-demo", 1, BotType::Grid, SYMBOL),
            BotRunConfig::Grid { config: grid_config, halt_policy: HaltPolicy::default() },
            grid_queue.clone(),
        )
        .await?;

    orchestrator
        .start(
            BotInstance::new("trend-demo", 2, BotType::AiTrend, SYMBOL),
            BotRunConfig::Trend {
                strategy: "trend".to_string(),
                params: serde_json::Value::Null,
                order_qty: 0.05,
                timeframe_secs: 1,
            },
            trend_queue.clone(),
        )
        .await?;

    // synthetic oscillation between the grid bounds
    for i in 0..600u32 {
        let phase = (i as f64 / 40.0) * std::f64::consts::TAU;
        let price = 95_500.0 + phase.sin() * 1_200.0 + ((i % 7) as f64 - 3.0) * 15.0;
        gateway.mark_price(SYMBOL, price);
        grid_queue.push(Tick::new(SYMBOL, price, 0.5, Utc::now()));
        trend_queue.push(Tick::new(SYMBOL, price, 0.5, Utc::now()));
        sleep(Duration::from_millis(25)).await;
    }

    sleep(Duration::from_millis(500)).await;

    for bot_id in ["grid-demo", "trend-demo"] {
        if let Some(status) = orchestrator.status(bot_id).await {
            println!(
                "{bot_id}: running={} ticks={} trades={} last_error={:?}",
                status.is_running, status.total_ticks, status.trades, status.last_error
            );
        }
    }
    println!("global resources: {:?}", resources.get_global_stats());

    orchestrator.stop(1, "grid-demo").await?;
    orchestrator.stop(2, "trend-demo").await?;

    for trade in store.trades() {
        println!(
            "trade {} {:?} qty={} entry={} exit={:?} pnl={}",
            trade.symbol, trade.side, trade.qty, trade.entry_price, trade.exit_price, trade.pnl
        );
    }

    Ok(())
}
