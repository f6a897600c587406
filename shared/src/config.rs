use dotenv::dotenv;
use std::str::FromStr;

/// Engine configuration, loaded from the environment with sensible defaults.
pub struct Config {
    pub market_ws_url: String,
    // Admission control
    pub max_concurrent_backtests_per_user: usize,
    pub max_total_concurrent_backtests: usize,
    pub max_daily_backtests_per_user: usize,
    pub max_concurrent_bots_per_user: usize,
    pub max_total_concurrent_bots: usize,
    // Market-data stream
    pub stream_initial_backoff_secs: f64,
    pub stream_max_backoff_secs: f64,
    pub stream_backoff_multiplier: f64,
    pub stream_liveness_window_secs: u64,
    pub stream_queue_capacity: usize,
    // Bot loops
    pub engine_tick_timeout_secs: u64,
    pub engine_max_consecutive_errors: u32,
    pub engine_stop_grace_secs: u64,
    pub engine_exchange_call_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv().ok();

        Ok(Config {
            market_ws_url: std::env::var("MARKET_WS_URL")
                .unwrap_or_else(|_| "wss://localhost:9443/market".to_string()),
            max_concurrent_backtests_per_user: env_or("RESOURCE_MAX_CONCURRENT_BACKTESTS_PER_USER", 2),
            max_total_concurrent_backtests: env_or("RESOURCE_MAX_TOTAL_CONCURRENT_BACKTESTS", 10),
            max_daily_backtests_per_user: env_or("RESOURCE_MAX_DAILY_BACKTESTS_PER_USER", 50),
            max_concurrent_bots_per_user: env_or("RESOURCE_MAX_CONCURRENT_BOTS_PER_USER", 5),
            max_total_concurrent_bots: env_or("RESOURCE_MAX_TOTAL_CONCURRENT_BOTS", 100),
            stream_initial_backoff_secs: env_or("STREAM_INITIAL_BACKOFF_SECS", 1.0),
            stream_max_backoff_secs: env_or("STREAM_MAX_BACKOFF_SECS", 60.0),
            stream_backoff_multiplier: env_or("STREAM_BACKOFF_MULTIPLIER", 2.0),
            stream_liveness_window_secs: env_or("STREAM_LIVENESS_WINDOW_SECS", 90),
            stream_queue_capacity: env_or("STREAM_QUEUE_CAPACITY", 1000),
            engine_tick_timeout_secs: env_or("ENGINE_TICK_TIMEOUT_SECS", 30),
            engine_max_consecutive_errors: env_or("ENGINE_MAX_CONSECUTIVE_ERRORS", 10),
            engine_stop_grace_secs: env_or("ENGINE_STOP_GRACE_SECS", 5),
            engine_exchange_call_timeout_secs: env_or("ENGINE_EXCHANGE_CALL_TIMEOUT_SECS", 10),
        })
    }
}
