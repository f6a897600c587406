//! Engine-level error taxonomy.
//!
//! Transient exchange/stream failures are retried inside the bot loops and
//! never surface here; this type covers the failures a caller must act on.

use shared::models::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Admission control denied the start. The message is the specific
    /// limiting rule, surfaced verbatim to the caller.
    #[error("{0}")]
    AdmissionDenied(String),

    /// Grid parameters failed validation at creation time.
    #[error("invalid grid config: {0}")]
    InvalidConfig(#[from] ValidationError),

    /// The strategy code is not a registered variant.
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
