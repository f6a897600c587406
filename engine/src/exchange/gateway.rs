//! Gateway trait and the typed error taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::Side;
use thiserror::Error;

/// Failures an exchange call can produce. Callers branch on the variant:
/// transient ones are retried by the bot loop, the rest count toward the
/// consecutive-error threshold.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient margin")]
    InsufficientMargin,

    #[error("exchange connectivity error: {0}")]
    Connectivity(String),

    #[error("exchange request timed out")]
    Timeout,
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Connectivity(_) | ExchangeError::Timeout)
    }
}

/// Handle to an order accepted by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    /// Limit price; `None` for market orders.
    pub price: Option<f64>,
}

/// Confirmation that an order (fully) filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

/// Ephemeral view of the authoritative exchange position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub leverage: f64,
}

/// Narrow interface to the venue. Implementations live outside the engine;
/// every call is awaited with a bounded timeout by the callers.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        price: Option<f64>,
    ) -> Result<OrderRef, ExchangeError>;

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), ExchangeError>;

    /// Poll for a fill of the given order. `None` while still open.
    async fn get_fills(&self, order: &OrderRef) -> Result<Option<FillEvent>, ExchangeError>;

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, ExchangeError>;
}
