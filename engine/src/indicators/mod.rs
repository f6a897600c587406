//! Technical indicators
//!
//! Streaming wrappers over the `ta` crate plus the composite
//! [`IndicatorSnapshot`] the strategy evaluators consume. A snapshot is
//! recomputed from scratch on every call with fresh indicator state, so the
//! same candle history always produces the same snapshot.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod volume;

pub use atr::Atr;
pub use ema::Ema;
pub use macd::Macd;
pub use rsi::Rsi;
pub use volume::VolumeRatio;

use crate::data::Candle;
use serde::{Deserialize, Serialize};

/// Common interface for streaming indicators.
pub trait Indicator {
    fn name(&self) -> &str;

    /// Feed the next value.
    fn update(&mut self, value: f64);

    /// Current value, `None` until enough data has been seen.
    fn value(&self) -> Option<f64>;

    fn is_ready(&self) -> bool;
}

/// Indicator periods used by the trend evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub rsi_length: usize,
    pub atr_length: usize,
    pub volume_window: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_slow: 21,
            ema_trend: 55,
            rsi_length: 14,
            atr_length: 14,
            volume_window: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

/// One indicator reading per evaluation call.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,
    pub rsi: f64,
    pub macd_hist: f64,
    pub atr_percent: f64,
    pub volume_ratio: f64,
}

/// Compute a snapshot from a candle history (oldest first).
///
/// Returns `None` on an empty history. Indicators that have not seen enough
/// data fall back to neutral readings (RSI 50, MACD 0, volume ratio 1) so a
/// short history degrades instead of failing.
pub fn snapshot(candles: &[Candle], params: &IndicatorParams) -> Option<IndicatorSnapshot> {
    let last = candles.last()?;

    let mut ema_fast = Ema::new(params.ema_fast);
    let mut ema_slow = Ema::new(params.ema_slow);
    let mut ema_trend = Ema::new(params.ema_trend);
    let mut rsi = Rsi::new(params.rsi_length);
    let mut macd = Macd::new(params.macd_fast, params.macd_slow, params.macd_signal);
    let mut atr = Atr::new(params.atr_length);
    let mut volume = VolumeRatio::new(params.volume_window);

    for candle in candles {
        ema_fast.update(candle.close);
        ema_slow.update(candle.close);
        ema_trend.update(candle.close);
        rsi.update(candle.close);
        macd.update(candle.close);
        atr.update_candle(candle);
        volume.update(candle.volume);
    }

    Some(IndicatorSnapshot {
        close: last.close,
        ema_fast: ema_fast.value().unwrap_or(last.close),
        ema_slow: ema_slow.value().unwrap_or(last.close),
        ema_trend: ema_trend.value().unwrap_or(last.close),
        rsi: rsi.value().unwrap_or(50.0),
        macd_hist: macd.histogram().unwrap_or(0.0),
        atr_percent: atr.percent_of(last.close).unwrap_or(0.6),
        volume_ratio: volume.value().unwrap_or(1.0),
    })
}
