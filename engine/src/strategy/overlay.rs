//! Optional prediction overlay.
//!
//! The overlay is an external collaborator (an ML service, usually). When
//! configured, [`OverlayEvaluator`] decorates a rule evaluator: confident
//! disagreement vetoes entries, a flagged bad entry window blocks them, and a
//! confident stop-loss forecast overrides the rule-based stop within a fixed
//! band. Absence of the overlay is a valid configuration.

use crate::data::Candle;
use crate::exchange::PositionSnapshot;
use crate::indicators::{Ema, Indicator};
use crate::strategy::{Decision, Evaluate, TradeAction};
use shared::models::Side;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DirectionForecast {
    pub direction: Side,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TimingForecast {
    pub is_good_entry: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct StopLossForecast {
    pub optimal_sl_percent: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub direction: DirectionForecast,
    pub timing: TimingForecast,
    pub stoploss: StopLossForecast,
    /// Outright "do not enter" flag.
    pub skip_entry: bool,
    pub combined_confidence: f64,
}

/// Collaborator interface. `None` means the overlay has nothing to say for
/// this input (missing features, cold model), which callers treat the same
/// as the overlay being disabled.
pub trait PredictionOverlay: Send + Sync {
    fn predict(&self, candles: &[Candle], symbol: &str, rule_signal: Side) -> Option<Prediction>;
}

/// Decorator applying overlay gating to a rule evaluator's decisions.
pub struct OverlayEvaluator {
    inner: Box<dyn Evaluate>,
    overlay: Arc<dyn PredictionOverlay>,
    symbol: String,
    name: String,
}

impl OverlayEvaluator {
    pub fn new(inner: Box<dyn Evaluate>, overlay: Arc<dyn PredictionOverlay>, symbol: impl Into<String>) -> Self {
        let name = format!("{}+overlay", inner.name());
        Self { inner, overlay, symbol: symbol.into(), name }
    }

    /// Rule-side hint fed to the overlay, from the short/long EMA ordering.
    fn rule_side(candles: &[Candle]) -> Side {
        let mut fast = Ema::new(9);
        let mut slow = Ema::new(21);
        for candle in candles {
            fast.update(candle.close);
            slow.update(candle.close);
        }
        match (fast.value(), slow.value()) {
            (Some(f), Some(s)) if f < s => Side::Sell,
            _ => Side::Buy,
        }
    }
}

impl Evaluate for OverlayEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &mut self,
        current_price: f64,
        candles: &[Candle],
        position: Option<&PositionSnapshot>,
    ) -> Decision {
        let mut decision = self.inner.evaluate(current_price, candles, position);

        let rule_side = Self::rule_side(candles);
        let Some(prediction) = self.overlay.predict(candles, &self.symbol, rule_side) else {
            return decision;
        };

        // a confident stop-loss forecast overrides the rule stop, clamped
        if decision.stop_loss.is_some() && prediction.stoploss.confidence > 0.55 {
            decision.stop_loss = Some(prediction.stoploss.optimal_sl_percent.clamp(0.6, 1.8));
        }

        let decision_side = match decision.action {
            TradeAction::Buy => Side::Buy,
            TradeAction::Sell => Side::Sell,
            _ => return decision,
        };

        let entering = position.map_or(true, |p| p.size <= 0.0);
        let disagrees =
            prediction.direction.confidence > 0.55 && prediction.direction.direction != decision_side;

        if entering {
            if prediction.skip_entry {
                return Decision::hold("ml_skip");
            }
            if disagrees {
                return Decision::hold("ml_mismatch");
            }
            if !prediction.timing.is_good_entry && prediction.timing.confidence > 0.6 {
                return Decision::hold("timing_block");
            }
            decision.confidence =
                decision.confidence.max(prediction.combined_confidence).clamp(0.35, 0.95);
        } else if disagrees {
            // scale-in must agree with the overlay direction
            return Decision::hold("ml_mismatch")
                .with_stop_loss(decision.stop_loss.unwrap_or(0.0))
                .with_take_profit(decision.take_profit.unwrap_or(0.0));
        }

        decision
    }
}
