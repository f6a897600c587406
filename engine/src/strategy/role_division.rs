//! Fast-entry / smart-management evaluator.
//!
//! Entries fire on relaxed conditions (RSI band rebound or an EMA cross),
//! exits are managed with fixed percent targets, a trailing lock after +1%
//! and an immediate close on a reverse signal. Complements the scored
//! [`TrendEvaluator`](crate::strategy::TrendEvaluator) as the second
//! registered strategy variant.

use crate::data::Candle;
use crate::exchange::PositionSnapshot;
use crate::indicators::{Ema, Indicator, Rsi};
use crate::strategy::{Decision, Evaluate, TradeAction};
use serde::{Deserialize, Serialize};
use shared::models::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleDivisionParams {
    pub min_candles: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Fixed stop-loss, percent of entry.
    pub stop_loss_percent: f64,
    /// Fixed take-profit, percent of entry.
    pub take_profit_percent: f64,
    /// Profit (percent) that arms the trailing lock.
    pub trailing_trigger_percent: f64,
    /// Profit (percent) locked in once trailing is armed.
    pub trailing_lock_percent: f64,
}

impl Default for RoleDivisionParams {
    fn default() -> Self {
        Self {
            min_candles: 20,
            ema_short: 9,
            ema_long: 21,
            rsi_period: 14,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            stop_loss_percent: 1.5,
            take_profit_percent: 3.0,
            trailing_trigger_percent: 1.0,
            trailing_lock_percent: 0.5,
        }
    }
}

pub struct RoleDivisionEvaluator {
    params: RoleDivisionParams,
}

struct Readings {
    ema_short_prev: f64,
    ema_short_now: f64,
    ema_long_prev: f64,
    ema_long_now: f64,
    rsi: f64,
}

impl RoleDivisionEvaluator {
    pub fn new(params: RoleDivisionParams) -> Self {
        Self { params }
    }

    fn readings(&self, candles: &[Candle]) -> Option<Readings> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let (&last, rest) = closes.split_last()?;

        let feed = |period: usize| -> (Option<f64>, Option<f64>) {
            let mut ema = Ema::new(period);
            for &close in rest {
                ema.update(close);
            }
            let previous = ema.value();
            ema.update(last);
            (previous, ema.value())
        };

        let (short_prev, short_now) = feed(self.params.ema_short);
        let (long_prev, long_now) = feed(self.params.ema_long);

        let mut rsi = Rsi::new(self.params.rsi_period);
        for &close in &closes {
            rsi.update(close);
        }

        Some(Readings {
            ema_short_prev: short_prev?,
            ema_short_now: short_now?,
            ema_long_prev: long_prev?,
            ema_long_now: long_now?,
            rsi: rsi.value()?,
        })
    }

    fn manage_position(
        &self,
        current_price: f64,
        readings: &Readings,
        position: &PositionSnapshot,
    ) -> Decision {
        let p = &self.params;
        let entry = position.entry_price;
        if entry <= 0.0 {
            return Decision::hold("position_hold");
        }

        let downtrend = readings.ema_short_now < readings.ema_long_now;
        let uptrend = readings.ema_short_now > readings.ema_long_now;

        let (pnl, trailing_floor, reverse) = match position.side {
            Side::Buy => (
                (current_price - entry) / entry * 100.0,
                entry * (1.0 + p.trailing_lock_percent / 100.0),
                downtrend && readings.rsi > p.rsi_overbought,
            ),
            Side::Sell => (
                (entry - current_price) / entry * 100.0,
                entry * (1.0 - p.trailing_lock_percent / 100.0),
                uptrend && readings.rsi < p.rsi_oversold,
            ),
        };

        if pnl >= p.trailing_trigger_percent {
            let retraced = match position.side {
                Side::Buy => current_price < trailing_floor,
                Side::Sell => current_price > trailing_floor,
            };
            if retraced {
                return Decision::close("trailing_stop", 0.9);
            }
        }
        if pnl <= -p.stop_loss_percent {
            return Decision::close("stop_loss", 0.95);
        }
        if pnl >= p.take_profit_percent {
            return Decision::close("take_profit", 0.9);
        }
        if reverse {
            return Decision::close("reverse_signal", 0.85);
        }

        Decision::hold("position_hold")
            .with_stop_loss(p.stop_loss_percent)
            .with_take_profit(p.take_profit_percent)
    }

    fn evaluate_entry(&self, readings: &Readings) -> Decision {
        let p = &self.params;
        let uptrend = readings.ema_short_now > readings.ema_long_now;
        let downtrend = readings.ema_short_now < readings.ema_long_now;

        let cross_up = readings.ema_short_prev <= readings.ema_long_prev
            && readings.ema_short_now > readings.ema_long_now;
        let cross_down = readings.ema_short_prev >= readings.ema_long_prev
            && readings.ema_short_now < readings.ema_long_now;

        // rebound out of the oversold band, or a fresh golden cross
        let long_band = uptrend && readings.rsi >= 25.0 && readings.rsi <= 50.0;
        let long_cross = cross_up && readings.rsi <= 55.0;
        if long_band || long_cross {
            let (confidence, reason) =
                if long_cross { (0.75, "golden_cross") } else { (0.65, "rsi_rebound") };
            return Decision::entry(TradeAction::Buy, confidence, reason)
                .with_stop_loss(p.stop_loss_percent)
                .with_take_profit(p.take_profit_percent);
        }

        let short_band = downtrend && readings.rsi >= 50.0 && readings.rsi <= 75.0;
        let short_cross = cross_down && readings.rsi >= 45.0;
        if short_band || short_cross {
            let (confidence, reason) =
                if short_cross { (0.75, "dead_cross") } else { (0.65, "rsi_pullback") };
            return Decision::entry(TradeAction::Sell, confidence, reason)
                .with_stop_loss(p.stop_loss_percent)
                .with_take_profit(p.take_profit_percent);
        }

        Decision::hold("no_entry")
    }
}

impl Evaluate for RoleDivisionEvaluator {
    fn name(&self) -> &str {
        "role_division"
    }

    fn evaluate(
        &mut self,
        current_price: f64,
        candles: &[Candle],
        position: Option<&PositionSnapshot>,
    ) -> Decision {
        if candles.len() < self.params.min_candles {
            return Decision::hold("insufficient_candles");
        }
        let Some(readings) = self.readings(candles) else {
            return Decision::hold("indicators_not_ready");
        };

        if let Some(position) = position.filter(|p| p.size > 0.0) {
            return self.manage_position(current_price, &readings, position);
        }

        self.evaluate_entry(&readings)
    }
}
