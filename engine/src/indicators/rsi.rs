//! RSI (Relative Strength Index) indicator

use crate::indicators::Indicator;
use ta::indicators::RelativeStrengthIndex;
use ta::Next;

/// RSI wrapper. Needs `period + 1` closes before reporting a value.
#[derive(Debug)]
pub struct Rsi {
    inner: RelativeStrengthIndex,
    period: usize,
    update_count: usize,
    last_value: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            inner: RelativeStrengthIndex::new(period)
                .unwrap_or_else(|_| RelativeStrengthIndex::default()),
            period,
            update_count: 0,
            last_value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "RSI"
    }

    fn update(&mut self, value: f64) {
        let rsi = self.inner.next(value);
        self.update_count += 1;
        if self.update_count > self.period {
            self.last_value = Some(rsi);
        }
    }

    fn value(&self) -> Option<f64> {
        self.last_value
    }

    fn is_ready(&self) -> bool {
        self.update_count > self.period
    }
}
