//! Trend-following evaluator: scored multi-indicator entries, ATR-derived
//! risk targets, trailing-stop and scale-in position management.

use crate::data::Candle;
use crate::exchange::PositionSnapshot;
use crate::indicators::{self, IndicatorParams, IndicatorSnapshot};
use crate::strategy::{Decision, Evaluate, TradeAction};
use serde::{Deserialize, Serialize};
use shared::models::Side;

/// History required before the evaluator produces anything but `Hold`.
pub const MIN_CANDLES: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    pub indicators: IndicatorParams,
    /// Minimum winning score for an entry.
    pub entry_threshold: f64,
    pub max_adds: u32,
    /// Profit step (raw percent) unlocking the next scale-in.
    pub add_step_percent: f64,
    /// Scale-in size as a fraction of the current position size.
    pub add_scale: f64,
    pub min_candles: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            indicators: IndicatorParams::default(),
            entry_threshold: 4.0,
            max_adds: 3,
            add_step_percent: 0.8,
            add_scale: 0.35,
            min_candles: MIN_CANDLES,
        }
    }
}

/// Per-position memory: scale-in count and best seen (leverage-adjusted)
/// profit for the trailing stop. Reset whenever the position side changes or
/// the position is gone.
#[derive(Debug, Default, Clone)]
struct PositionMemory {
    side: Option<Side>,
    add_count: u32,
    max_profit_percent: f64,
}

pub struct TrendEvaluator {
    params: TrendParams,
    memory: PositionMemory,
}

impl TrendEvaluator {
    pub fn new(params: TrendParams) -> Self {
        Self { params, memory: PositionMemory::default() }
    }

    fn evaluate_entry(&self, snapshot: &IndicatorSnapshot) -> Decision {
        let (long_score, short_score, reasons) = score_entry(snapshot);

        let action = if long_score >= self.params.entry_threshold && long_score >= short_score + 1.0
        {
            TradeAction::Buy
        } else if short_score >= self.params.entry_threshold && short_score >= long_score + 1.0 {
            TradeAction::Sell
        } else {
            return Decision::hold("no_entry");
        };

        let (stop_loss, take_profit) = risk_targets(snapshot);
        let confidence = confidence_from_score(long_score.max(short_score));
        let reason = if reasons.is_empty() { "entry".to_string() } else { reasons.join("; ") };

        Decision::entry(action, confidence, reason)
            .with_stop_loss(stop_loss)
            .with_take_profit(take_profit)
    }

    fn manage_position(
        &mut self,
        current_price: f64,
        snapshot: &IndicatorSnapshot,
        position: &PositionSnapshot,
    ) -> Decision {
        let side = position.side;
        let entry_price = position.entry_price;
        let leverage = position.leverage.max(1.0);
        let raw_pnl = pnl_percent(side, entry_price, current_price, 1.0);
        let pnl = pnl_percent(side, entry_price, current_price, leverage);

        self.sync_memory(side, pnl);
        let (stop_loss, take_profit) = risk_targets(snapshot);

        if pnl <= -stop_loss {
            return Decision::close("stop_loss", 0.7)
                .with_stop_loss(stop_loss)
                .with_take_profit(take_profit);
        }

        // trailing stop arms once the best excursion has reached take-profit
        if self.memory.max_profit_percent >= take_profit {
            let floor = stop_loss.max(self.memory.max_profit_percent * 0.5);
            if pnl <= floor {
                return Decision::close("trailing_stop", 0.7)
                    .with_stop_loss(stop_loss)
                    .with_take_profit(take_profit);
            }
        }

        if reversal_against(side, snapshot) {
            return Decision::close("trend_reversal", 0.7)
                .with_stop_loss(stop_loss)
                .with_take_profit(take_profit);
        }

        if let Some(confidence) = self.check_add(side, raw_pnl, snapshot) {
            let action = match side {
                Side::Buy => TradeAction::Buy,
                Side::Sell => TradeAction::Sell,
            };
            let add_size = (position.size * self.params.add_scale).max(0.0);
            return Decision::entry(action, confidence, "add_on_profit")
                .with_stop_loss(stop_loss)
                .with_take_profit(take_profit)
                .with_size(add_size);
        }

        Decision::hold("manage_hold").with_stop_loss(stop_loss).with_take_profit(take_profit)
    }

    fn check_add(&mut self, side: Side, raw_pnl: f64, snapshot: &IndicatorSnapshot) -> Option<f64> {
        if self.memory.add_count >= self.params.max_adds {
            return None;
        }
        let next_step = self.params.add_step_percent * (self.memory.add_count + 1) as f64;
        if raw_pnl < next_step {
            return None;
        }
        // don't add into an overextended or misaligned market
        match side {
            Side::Buy => {
                if snapshot.rsi >= 75.0
                    || snapshot.ema_fast < snapshot.ema_slow
                    || snapshot.macd_hist < 0.0
                {
                    return None;
                }
            }
            Side::Sell => {
                if snapshot.rsi <= 25.0
                    || snapshot.ema_fast > snapshot.ema_slow
                    || snapshot.macd_hist > 0.0
                {
                    return None;
                }
            }
        }
        self.memory.add_count += 1;
        Some(confidence_from_score(5.0).max(0.55))
    }

    fn sync_memory(&mut self, side: Side, pnl_percent: f64) {
        if self.memory.side != Some(side) {
            self.memory =
                PositionMemory { side: Some(side), add_count: 0, max_profit_percent: pnl_percent };
        } else if pnl_percent > self.memory.max_profit_percent {
            self.memory.max_profit_percent = pnl_percent;
        }
    }
}

impl Evaluate for TrendEvaluator {
    fn name(&self) -> &str {
        "trend"
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
        let Some(snapshot) = indicators::snapshot(candles, &self.params.indicators) else {
            return Decision::hold("indicator_error");
        };

        if let Some(position) = position.filter(|p| p.size > 0.0) {
            return self.manage_position(current_price, &snapshot, position);
        }

        self.memory = PositionMemory::default();
        self.evaluate_entry(&snapshot)
    }
}

fn score_entry(snapshot: &IndicatorSnapshot) -> (f64, f64, Vec<&'static str>) {
    let mut long_score = 0.0;
    let mut short_score = 0.0;
    let mut reasons = Vec::new();

    if snapshot.ema_fast > snapshot.ema_slow {
        long_score += 1.0;
        reasons.push("ema_fast>ema_slow");
    }
    if snapshot.ema_fast < snapshot.ema_slow {
        short_score += 1.0;
        reasons.push("ema_fast<ema_slow");
    }
    if snapshot.close > snapshot.ema_fast {
        long_score += 1.0;
        reasons.push("price>ema_fast");
    }
    if snapshot.close < snapshot.ema_fast {
        short_score += 1.0;
        reasons.push("price<ema_fast");
    }
    if snapshot.rsi >= 50.0 {
        long_score += 1.0;
    }
    if snapshot.rsi <= 50.0 {
        short_score += 1.0;
    }
    if snapshot.macd_hist > 0.0 {
        long_score += 1.0;
    }
    if snapshot.macd_hist < 0.0 {
        short_score += 1.0;
    }
    // a volume surge strengthens either side
    if snapshot.volume_ratio >= 1.05 {
        long_score += 1.0;
        short_score += 1.0;
    }

    (long_score, short_score, reasons)
}

fn risk_targets(snapshot: &IndicatorSnapshot) -> (f64, f64) {
    let stop_loss = (snapshot.atr_percent * 1.2).clamp(0.6, 1.6);
    let take_profit = (snapshot.atr_percent * 2.4).clamp(1.2, 4.5);
    (stop_loss, take_profit)
}

fn reversal_against(side: Side, snapshot: &IndicatorSnapshot) -> bool {
    match side {
        Side::Buy => snapshot.ema_fast < snapshot.ema_slow && snapshot.rsi < 45.0,
        Side::Sell => snapshot.ema_fast > snapshot.ema_slow && snapshot.rsi > 55.0,
    }
}

fn pnl_percent(side: Side, entry_price: f64, current_price: f64, leverage: f64) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    let raw = match side {
        Side::Buy => (current_price - entry_price) / entry_price,
        Side::Sell => (entry_price - current_price) / entry_price,
    };
    raw * 100.0 * leverage
}

fn confidence_from_score(score: f64) -> f64 {
    (0.45 + score.min(6.0) * 0.05).clamp(0.35, 0.95)
}
