//! Fixed-capacity candle history, owned per subscription.
//!
//! Each bot loop owns exactly one ring for its symbol and passes slices of it
//! into the strategy evaluator. There is no process-wide candle state.

use crate::data::Candle;
use std::collections::VecDeque;

/// Append-bounded candle buffer: pushing beyond capacity evicts the oldest.
#[derive(Debug)]
pub struct CandleRing {
    buf: VecDeque<Candle>,
    capacity: usize,
}

impl CandleRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(candle);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.buf.back()
    }

    /// Ordered view (oldest first) as a contiguous slice.
    pub fn as_slice(&mut self) -> &[Candle] {
        self.buf.make_contiguous();
        self.buf.as_slices().0
    }
}
