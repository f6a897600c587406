//! Volume surge detection: current volume vs its rolling average.

use crate::indicators::Indicator;
use ta::indicators::SimpleMovingAverage;
use ta::Next;

/// Ratio of the latest volume to the rolling mean over `window` bars.
/// A reading above ~1.05 is treated as a surge by the trend evaluator.
#[derive(Debug)]
pub struct VolumeRatio {
    sma: SimpleMovingAverage,
    window: usize,
    update_count: usize,
    last_volume: Option<f64>,
    last_average: Option<f64>,
}

impl VolumeRatio {
    pub fn new(window: usize) -> Self {
        Self {
            sma: SimpleMovingAverage::new(window).unwrap_or_else(|_| SimpleMovingAverage::default()),
            window,
            update_count: 0,
            last_volume: None,
            last_average: None,
        }
    }
}

impl Indicator for VolumeRatio {
    fn name(&self) -> &str {
        "VolumeRatio"
    }

    fn update(&mut self, value: f64) {
        let average = self.sma.next(value);
        self.update_count += 1;
        self.last_volume = Some(value);
        self.last_average = Some(average);
    }

    fn value(&self) -> Option<f64> {
        match (self.last_volume, self.last_average) {
            (Some(volume), Some(average)) if average > 0.0 => Some(volume / average),
            (Some(_), Some(_)) => Some(1.0),
            _ => None,
        }
    }

    fn is_ready(&self) -> bool {
        self.update_count >= self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surge_reads_above_one() {
        let mut ratio = VolumeRatio::new(4);
        for _ in 0..4 {
            ratio.update(100.0);
        }
        ratio.update(200.0);
        assert!(ratio.value().unwrap() > 1.2);
    }

    #[test]
    fn test_flat_volume_is_neutral() {
        let mut ratio = VolumeRatio::new(4);
        for _ in 0..8 {
            ratio.update(50.0);
        }
        let value = ratio.value().unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }
}
