//! Tick-to-candle aggregation.
//!
//! Trend bots consume candles; the stream delivers trade ticks. The
//! aggregator buckets ticks into fixed timeframe windows and emits the
//! completed candle when a tick lands in a newer window.

use crate::data::Candle;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone)]
struct Building {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    window_start: i64,
}

impl Building {
    fn new(price: f64, qty: f64, window_start: i64) -> Self {
        Self { open: price, high: price, low: price, close: price, volume: qty, window_start }
    }

    fn update(&mut self, price: f64, qty: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += qty;
    }

    fn finish(&self) -> Candle {
        let timestamp: DateTime<Utc> = Utc
            .timestamp_opt(self.window_start, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Candle::new(self.open, self.high, self.low, self.close, self.volume, timestamp)
    }
}

/// Buckets ticks into `timeframe_secs` windows.
#[derive(Debug)]
pub struct CandleAggregator {
    timeframe_secs: i64,
    current: Option<Building>,
}

impl CandleAggregator {
    pub fn new(timeframe_secs: u64) -> Self {
        Self { timeframe_secs: timeframe_secs.max(1) as i64, current: None }
    }

    /// Feed one tick. Returns the completed candle when the tick opens a new
    /// window.
    pub fn on_tick(&mut self, price: f64, qty: f64, timestamp: DateTime<Utc>) -> Option<Candle> {
        let window_start = (timestamp.timestamp() / self.timeframe_secs) * self.timeframe_secs;

        match self.current.as_mut() {
            Some(building) if window_start > building.window_start => {
                let completed = building.finish();
                self.current = Some(Building::new(price, qty, window_start));
                Some(completed)
            }
            Some(building) => {
                building.update(price, qty);
                None
            }
            None => {
                self.current = Some(Building::new(price, qty, window_start));
                None
            }
        }
    }

    /// Close out the in-progress candle without waiting for the next window,
    /// used by timer-driven flushes when the market goes quiet.
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take().map(|b| b.finish())
    }
}

/// Parse a `"1m"` / `"5m"` / `"1h"` / `"1d"` timeframe into seconds.
/// Unknown formats fall back to one minute.
pub fn timeframe_to_seconds(timeframe: &str) -> u64 {
    let tf = timeframe.to_lowercase();
    let parse = |suffix: char, unit: u64| {
        tf.strip_suffix(suffix).and_then(|n| n.parse::<u64>().ok()).map(|n| n * unit)
    };
    parse('m', 60)
        .or_else(|| parse('h', 3600))
        .or_else(|| parse('d', 86400))
        .unwrap_or(60)
}
