//! Relay Error Types

use thiserror::Error;
use uuid::Uuid;

use crate::chain::ChainError;
use crate::store::StoreError;

#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Actor for order {0} is unavailable")]
    ActorUnavailable(Uuid),
}

impl RelayError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Store(_) => "STORE_ERROR",
            RelayError::Chain(_) => "CHAIN_ERROR",
            RelayError::InvalidAmount(_) => "INVALID_AMOUNT",
            RelayError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            RelayError::ActorUnavailable(_) => "ACTOR_UNAVAILABLE",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            RelayError::InvalidAmount(_) => 400,
            RelayError::OrderNotFound(_) => 404,
            RelayError::Chain(_) => 502,
            RelayError::Store(_) | RelayError::ActorUnavailable(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RelayError::from(StoreError::Database("gone".into()));
        assert_eq!(err.code(), "STORE_ERROR");
        assert_eq!(err.http_status(), 503);

        let err = RelayError::from(ChainError::Rejected("nonce".into()));
        assert_eq!(err.code(), "CHAIN_ERROR");
        assert!(err.to_string().contains("nonce"));
    }
}
