//! Chain Provider Contract
//!
//! One provider per chain family (native ledger, EVM, Solana) plus a
//! multi-endpoint [`FallbackProvider`]. Only the call contract matters to the
//! relay; RPC client internals live behind the trait.
//!
//! # Error contract
//!
//! - [`ChainError::Rejected`]: the node explicitly refused the request. Final.
//! - [`ChainError::Transport`]: outcome unknown (timeout, unreachable). Never
//!   treat as failure of an already-signed transaction.

pub mod fallback;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
pub mod registry;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use fallback::FallbackProvider;
#[cfg(any(test, feature = "mock-api"))]
pub use mock::MockChainProvider;
pub use registry::ProviderRegistry;
pub use rpc::JsonRpcProvider;

/// Contract method used to release assets on the destination chain
pub const RELEASE_METHOD: &str = "ReleaseAsset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Native ledger (AElf-style contract chains)
    Native,
    Evm,
    Solana,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Native => write!(f, "native"),
            ChainFamily::Evm => write!(f, "evm"),
            ChainFamily::Solana => write!(f, "solana"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by node: {0}")]
    Rejected(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Worth trying again (possibly on another endpoint)
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// A built destination-chain transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub tx_id: String,
    /// Hex encoded transaction bytes
    pub raw_hex: String,
    pub signed: bool,
}

/// Terminal node result for a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxResultStatus {
    Mined,
    NodeValidationFailed,
    Pending,
    PendingValidation,
    NotExisted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub status: TxResultStatus,
    pub error: Option<String>,
    pub block_height: Option<u64>,
}

impl TxResult {
    pub fn pending() -> Self {
        Self {
            status: TxResultStatus::Pending,
            error: None,
            block_height: None,
        }
    }
}

/// Confirmation snapshot used by the confirmation timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxConfirmation {
    NotFound,
    Pending,
    Mined {
        height: u64,
        confirmations: u32,
        block_hash: Option<String>,
    },
    Failed(String),
}

/// Chain provider contract
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Build a contract call; returns the transaction id alongside the bytes
    async fn create_transaction(
        &self,
        chain_id: &str,
        from: &str,
        contract: &str,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<ChainTransaction, ChainError>;

    /// Sign a built transaction; already-signed input is returned unchanged
    async fn sign_transaction(
        &self,
        chain_id: &str,
        tx: ChainTransaction,
    ) -> Result<ChainTransaction, ChainError>;

    /// Submit signed bytes. Re-sending identical bytes is harmless.
    async fn send_transaction(&self, chain_id: &str, raw_hex: &str) -> Result<(), ChainError>;

    /// Wait up to `max_wait` for a terminal result, polling every `poll_interval`
    async fn poll_result(
        &self,
        chain_id: &str,
        tx_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<TxResult, ChainError>;

    /// Current status and confirmation depth
    async fn query_transaction(
        &self,
        chain_id: &str,
        tx_id: &str,
    ) -> Result<TxConfirmation, ChainError>;

    async fn contract_address(&self, chain_id: &str, name: &str) -> Result<String, ChainError>;
}
