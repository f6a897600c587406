//! ATR (Average True Range) indicator

use crate::data::Candle;
use crate::indicators::Indicator;
use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};

/// ATR wrapper. Fed whole candles so the true range can account for gaps
/// against the previous close; `update(f64)` exists for the trait but only
/// sees closes.
#[derive(Debug)]
pub struct Atr {
    inner: AverageTrueRange,
    period: usize,
    update_count: usize,
    last_value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            inner: AverageTrueRange::new(period).unwrap_or_else(|_| AverageTrueRange::default()),
            period,
            update_count: 0,
            last_value: None,
        }
    }

    /// Feed one OHLCV candle.
    pub fn update_candle(&mut self, candle: &Candle) {
        let item = DataItem::builder()
            .open(candle.open)
            .high(candle.high)
            .low(candle.low)
            .close(candle.close)
            .volume(candle.volume)
            .build();
        // Inconsistent bars (high < low etc.) are skipped rather than poisoning the average.
        if let Ok(item) = item {
            let atr = self.inner.next(&item);
            self.update_count += 1;
            if self.update_count > self.period {
                self.last_value = Some(atr);
            }
        }
    }

    /// ATR as a percentage of the given reference price.
    pub fn percent_of(&self, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }
        self.last_value.map(|atr| atr / price * 100.0)
    }
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        "ATR"
    }

    fn update(&mut self, value: f64) {
        let atr = self.inner.next(value);
        self.update_count += 1;
        if self.update_count > self.period {
            self.last_value = Some(atr);
        }
    }

    fn value(&self) -> Option<f64> {
        self.last_value
    }

    fn is_ready(&self) -> bool {
        self.update_count > self.period
    }
}
