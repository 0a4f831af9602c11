use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the deal store when the registry rejects an operation.
///
/// These are non-fatal "rejected" results: callers report them back to the
/// user and carry on, they never abort a sweep.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("deal {0} is already tracked")]
    DuplicateId(String),

    #[error("an active deal already exists for symbol {0}")]
    DuplicateSymbol(String),

    #[error("no deal with id {0}")]
    NotFound(String),
}

/// Errors from the exchange transport collaborator.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("order placement failed: {0}")]
    OrderPlacementFailed(String),

    #[error("order cancellation failed: {0}")]
    OrderCancellationFailed(String),

    #[error("balance query failed: {0}")]
    BalanceQueryFailed(String),

    #[error("exchange error: {0}")]
    ExchangeSpecific(String),
}

/// Top-level engine error taxonomy.
///
/// Validation errors fail fast; business-rule violations carry a
/// human-readable reason and are never retried automatically; transport
/// failures are contained per deal except for the top-level fetch that a
/// reconciliation sweep depends on.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "message")]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("entry price equals stop-loss, position size is undefined")]
    EntryEqualsStopLoss,

    #[error("insufficient funds: required {required:.2}, available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("a recovery session is already in progress")]
    RecoveryInProgress,

    #[error("deal store rejected the operation: {0}")]
    Store(String),
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        EngineError::Transport(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.to_string())
    }
}

/// Validation errors for value objects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DuplicateId("deal_1".to_string());
        assert_eq!(err.to_string(), "deal deal_1 is already tracked");

        let err = StoreError::DuplicateSymbol("BTCUSDT".to_string());
        assert_eq!(
            err.to_string(),
            "an active deal already exists for symbol BTCUSDT"
        );
    }

    #[test]
    fn test_engine_error_from_transport() {
        let err: EngineError = TransportError::Network("timeout".to_string()).into();
        assert_eq!(err.to_string(), "transport error: network error: timeout");
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = EngineError::InsufficientFunds {
            required: 1234.567,
            available: 100.0,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: required 1234.57, available 100.00"
        );
    }

    #[test]
    fn test_engine_error_serializes() {
        let err = EngineError::UnknownStrategy("turbo".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("UnknownStrategy"));
    }
}
