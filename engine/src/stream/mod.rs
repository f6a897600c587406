//! Resilient market-data streaming.
//!
//! One [`StreamClient`] per venue connection; normalized [`Tick`]s land in a
//! bounded drop-oldest [`TickQueue`] which the bot loops consume. Freshness
//! beats completeness: under backpressure the oldest buffered tick is evicted
//! first.

pub mod client;
pub mod queue;

pub use client::{
    backoff_delay, ConnectionState, JsonTickCodec, StreamClient, StreamConfig, StreamStatus,
    VenueCodec,
};
pub use queue::{Tick, TickQueue};
