//! Market data types: candles, per-subscription ring buffers and the
//! tick-to-candle aggregator.

pub mod aggregator;
pub mod candle;
pub mod ring;

pub use aggregator::CandleAggregator;
pub use candle::Candle;
pub use ring::CandleRing;
