//! Strategy evaluation.
//!
//! Every strategy is a compiled implementation of the [`Evaluate`]
//! capability, selected through the closed [`StrategyRegistry`]. There is no
//! path that executes user-supplied code. The optional prediction overlay is
//! a decorator around a rule evaluator, not a strategy of its own.

pub mod evaluator;
pub mod overlay;
pub mod registry;
pub mod role_division;

pub use evaluator::{TrendEvaluator, TrendParams};
pub use overlay::{
    DirectionForecast, OverlayEvaluator, Prediction, PredictionOverlay, StopLossForecast,
    TimingForecast,
};
pub use registry::StrategyRegistry;
pub use role_division::{RoleDivisionEvaluator, RoleDivisionParams};

use crate::data::Candle;
use crate::exchange::PositionSnapshot;
use serde::{Deserialize, Serialize};

/// What the strategy wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    Close,
}

/// One strategy decision. Stop-loss and take-profit are leverage-unadjusted
/// percentages of the entry price; `size` is only set for scale-in orders.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: TradeAction,
    pub confidence: f64,
    pub reason: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub size: Option<f64>,
}

impl Decision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            confidence: 0.0,
            reason: reason.into(),
            stop_loss: None,
            take_profit: None,
            size: None,
        }
    }

    pub fn close(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: TradeAction::Close,
            confidence,
            reason: reason.into(),
            stop_loss: None,
            take_profit: None,
            size: None,
        }
    }

    pub fn entry(action: TradeAction, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            action,
            confidence,
            reason: reason.into(),
            stop_loss: None,
            take_profit: None,
            size: None,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }
}

/// A compiled strategy. Given identical `(price, candles, position)` inputs
/// an implementation must produce the identical decision; faults degrade to
/// `Hold`, never panic the bot loop.
pub trait Evaluate: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &mut self,
        current_price: f64,
        candles: &[Candle],
        position: Option<&PositionSnapshot>,
    ) -> Decision;
}
