//! MACD (Moving Average Convergence Divergence) indicator

use crate::indicators::Indicator;
use ta::indicators::{MovingAverageConvergenceDivergence, MovingAverageConvergenceDivergenceOutput};
use ta::Next;

/// MACD wrapper. The strategy evaluators only read the histogram
/// (MACD line minus signal line), but all three outputs are exposed.
#[derive(Debug)]
pub struct Macd {
    inner: MovingAverageConvergenceDivergence,
    slow_period: usize,
    signal_period: usize,
    update_count: usize,
    last_output: Option<MovingAverageConvergenceDivergenceOutput>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            inner: MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period)
                .unwrap_or_else(|_| MovingAverageConvergenceDivergence::default()),
            slow_period,
            signal_period,
            update_count: 0,
            last_output: None,
        }
    }

    pub fn macd(&self) -> Option<f64> {
        self.last_output.as_ref().map(|o| o.macd)
    }

    pub fn signal(&self) -> Option<f64> {
        self.last_output.as_ref().map(|o| o.signal)
    }

    pub fn histogram(&self) -> Option<f64> {
        self.last_output.as_ref().map(|o| o.histogram)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        "MACD"
    }

    fn update(&mut self, value: f64) {
        let output = self.inner.next(value);
        self.update_count += 1;
        if self.update_count > self.slow_period + self.signal_period {
            self.last_output = Some(output);
        }
    }

    fn value(&self) -> Option<f64> {
        self.histogram()
    }

    fn is_ready(&self) -> bool {
        self.update_count > self.slow_period + self.signal_period
    }
}
