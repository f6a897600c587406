//! Grid trading engine.
//!
//! Level prices are fixed when the grid is armed; each level runs a cyclic
//! buy/sell state machine. A configured stop price breaching halts the whole
//! grid before any per-level transition.

mod engine;
pub mod levels;

pub use engine::{FillOutcome, GridCycle, GridEngine, GridStep, HaltPolicy, OrderIntent};
pub use levels::{arithmetic_spacing, geometric_ratio, grid_prices};
