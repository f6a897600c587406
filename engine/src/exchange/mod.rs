//! Exchange gateway interface.
//!
//! The engine never talks wire protocols itself; it submits typed order
//! intents through [`ExchangeGateway`] and consumes typed failures. The
//! in-memory [`PaperExchange`] implementation backs tests and paper trading.

pub mod gateway;
pub mod paper;

pub use gateway::{ExchangeError, ExchangeGateway, FillEvent, OrderRef, PositionSnapshot};
pub use paper::PaperExchange;
