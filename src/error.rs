//! Error taxonomy shared by the trading core.
//!
//! Inner components return [`TradeError`]; only the outer cycle loops are
//! allowed to log-and-continue on these.

use thiserror::Error;

use crate::execution::Direction;

/// Errors produced by scoring, risk, execution and lifecycle code.
#[derive(Debug, Error)]
pub enum TradeError {
    /// Missing credentials, routes or invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// Price or market data missing for an asset this cycle.
    #[error("data unavailable for {0}")]
    DataUnavailable(String),

    /// Order engine used before it was connected.
    #[error("order engine not initialized")]
    NotInitialized,

    /// Another order for the same (asset, direction) is in flight.
    #[error("order already pending for {asset} ({direction})")]
    OrderAlreadyPending { asset: String, direction: Direction },

    /// Timeout or stale-state failure, retries exhausted.
    #[error("transient order failure: {0}")]
    OrderTransient(String),

    /// No route, rejected transaction, or other non-retryable failure.
    #[error("order failed: {0}")]
    OrderTerminal(String),

    /// An OPEN position already exists (or is being opened) for the asset.
    #[error("duplicate position for {0}")]
    DuplicatePosition(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TradeError {
    /// Short machine-readable code, matching the taxonomy names used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::Config(_) => "CONFIG_ERROR",
            TradeError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            TradeError::NotInitialized => "NOT_INITIALIZED",
            TradeError::OrderAlreadyPending { .. } => "ORDER_ALREADY_PENDING",
            TradeError::OrderTransient(_) => "ORDER_TRANSIENT_FAILURE",
            TradeError::OrderTerminal(_) => "ORDER_TERMINAL_FAILURE",
            TradeError::DuplicatePosition(_) => "INVARIANT_VIOLATION",
            TradeError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<sqlx::Error> for TradeError {
    fn from(e: sqlx::Error) -> Self {
        TradeError::Storage(e.to_string())
    }
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;
