//! Engine error type

use crate::exchange::OrderStatus;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine and its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// Exchange call failed (transport or business error)
    #[error("exchange error: {0}")]
    Exchange(String),
    /// Order storage read/write failed
    #[error("storage error: {0}")]
    Storage(String),
    /// Pair cannot be split into base and quote assets
    #[error("invalid pair: {0}")]
    InvalidPair(String),
    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// Order unknown to the exchange or storage
    #[error("order {id} not found for {pair}")]
    OrderNotFound { pair: String, id: String },
    /// Not enough free balance to place an order
    #[error("insufficient funds: {asset} required {required:.8}, available {available:.8}")]
    InsufficientFunds {
        asset: String,
        required: f64,
        available: f64,
    },
    /// Order status change rejected by the order state machine
    #[error("order {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// Market-data stream error
    #[error("stream error: {0}")]
    Stream(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
