//! Custody provider REST client
//!
//! Used to re-fetch a transaction before trusting a "success" callback, and by
//! the poller for transactions that were last seen pending.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::types::CustodyTransaction;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyClientError {
    #[error("Custody request failed: {0}")]
    Request(String),

    #[error("Custody API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Transaction not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait CustodyClient: Send + Sync {
    async fn get_transaction(&self, id: &str) -> Result<CustodyTransaction, CustodyClientError>;
}

/// Response envelope of the custody REST API
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: String,
}

pub struct HttpCustodyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCustodyClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CustodyClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                CustodyClientError::Request(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CustodyClient for HttpCustodyClient {
    async fn get_transaction(&self, id: &str) -> Result<CustodyTransaction, CustodyClientError> {
        let url = format!("{}/v1/custody/transaction/", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("id", id)])
            .header("Biz-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| CustodyClientError::Request(format!("HTTP request failed: {}", e)))?;

        let envelope: ApiEnvelope<CustodyTransaction> = response.json().await.map_err(|e| {
            CustodyClientError::Request(format!("Failed to parse response: {}", e))
        })?;

        if !envelope.success {
            return Err(CustodyClientError::Api {
                code: envelope.error_code,
                message: envelope.error_message,
            });
        }

        envelope
            .result
            .ok_or_else(|| CustodyClientError::NotFound(id.to_string()))
    }
}

#[cfg(any(test, feature = "mock-api"))]
pub mod mock {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves transactions from memory
    #[derive(Default)]
    pub struct MockCustodyClient {
        transactions: DashMap<String, CustodyTransaction>,
        fetch_count: AtomicUsize,
    }

    impl MockCustodyClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, transaction: CustodyTransaction) {
            self.transactions.insert(transaction.id.clone(), transaction);
        }

        pub fn fetch_count(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CustodyClient for MockCustodyClient {
        async fn get_transaction(
            &self,
            id: &str,
        ) -> Result<CustodyTransaction, CustodyClientError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.transactions
                .get(id)
                .map(|t| t.clone())
                .ok_or_else(|| CustodyClientError::NotFound(id.to_string()))
        }
    }
}
