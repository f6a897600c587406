//! Trading engine for multi-user automated bots.
//!
//! This crate hosts the five subsystems that make up the live engine:
//!
//! - **Orchestrator**: one supervised task per running bot ([`orchestrator`])
//! - **Stream**: resilient market-data client with reconnect/backoff ([`stream`])
//! - **Grid**: per-level grid order state machines ([`grid`])
//! - **Strategy**: rule-based evaluators plus an optional prediction overlay ([`strategy`])
//! - **Resource**: per-user and global admission control ([`resource`])
//!
//! Exchange access and persistence are narrow collaborator traits
//! ([`exchange::ExchangeGateway`], [`store::BotStore`]); in-memory
//! implementations are provided for tests and paper trading.
//!
//! # Example
//!
//! ```no_run
//! use engine::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let resources = Arc::new(ResourceController::new(ResourceLimits::default()));
//!     let gateway = Arc::new(PaperExchange::new(0.001));
//!     let store = Arc::new(MemoryStore::new());
//!     let orchestrator = BotOrchestrator::new(resources, gateway, store, EngineTuning::default());
//!     // orchestrator.start(..) per bot
//!     Ok(())
//! }
//! ```

pub mod data;
pub mod error;
pub mod exchange;
pub mod grid;
pub mod indicators;
pub mod orchestrator;
pub mod resource;
pub mod store;
pub mod strategy;
pub mod stream;

// Re-export commonly used types
pub mod prelude {
    pub use crate::data::*;
    pub use crate::error::EngineError;
    pub use crate::exchange::*;
    pub use crate::grid::*;
    pub use crate::indicators::*;
    pub use crate::orchestrator::*;
    pub use crate::resource::*;
    pub use crate::store::*;
    pub use crate::strategy::*;
    pub use crate::stream::*;

    pub use anyhow::{Context, Result};
    pub use shared::models::*;
}

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
