//! EMA (Exponential Moving Average) indicator

use crate::indicators::Indicator;
use ta::indicators::ExponentialMovingAverage;
use ta::Next;

/// EMA indicator wrapper. The value is withheld until `period` inputs have
/// been seen so early readings do not leak the seed value.
#[derive(Debug)]
pub struct Ema {
    inner: ExponentialMovingAverage,
    period: usize,
    update_count: usize,
    last_value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            inner: ExponentialMovingAverage::new(period)
                .unwrap_or_else(|_| ExponentialMovingAverage::default()),
            period,
            update_count: 0,
            last_value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        "EMA"
    }

    fn update(&mut self, value: f64) {
        let ema = self.inner.next(value);
        self.update_count += 1;
        if self.update_count >= self.period {
            self.last_value = Some(ema);
        }
    }

    fn value(&self) -> Option<f64> {
        self.last_value
    }

    fn is_ready(&self) -> bool {
        self.update_count >= self.period
    }
}
