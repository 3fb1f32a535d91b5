//! Multi-endpoint fallback provider
//!
//! Tries endpoints in order, starting from the last one that answered.
//! Transport errors move on to the next endpoint; explicit node rejections are
//! returned immediately since another endpoint would say the same.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

use super::{ChainError, ChainProvider, ChainTransaction, TxConfirmation, TxResult};

pub struct FallbackProvider {
    name: String,
    endpoints: Vec<Arc<dyn ChainProvider>>,
    /// Index of the endpoint that last succeeded
    preferred: AtomicUsize,
    /// Transport errors per endpoint
    errors: Vec<AtomicU64>,
    call_timeout: Duration,
}

impl FallbackProvider {
    pub fn new(
        name: impl Into<String>,
        endpoints: Vec<Arc<dyn ChainProvider>>,
        call_timeout: Duration,
    ) -> Self {
        let errors = endpoints.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            name: name.into(),
            endpoints,
            preferred: AtomicUsize::new(0),
            errors,
            call_timeout,
        }
    }

    /// Transport error count of endpoint `idx`
    pub fn error_count(&self, idx: usize) -> u64 {
        self.errors
            .get(idx)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    async fn call<T, F, Fut>(&self, method: &'static str, f: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<dyn ChainProvider>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        if self.endpoints.is_empty() {
            return Err(ChainError::Transport(format!(
                "{}: no endpoints configured",
                self.name
            )));
        }

        let start = self.preferred.load(Ordering::Relaxed) % self.endpoints.len();
        let mut last_err = ChainError::Transport("no endpoint attempted".to_string());

        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            let endpoint = self.endpoints[idx].clone();

            let outcome = match tokio::time::timeout(self.call_timeout, f(endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(ChainError::Transport(format!(
                    "{} timed out after {:?}",
                    method, self.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.preferred.store(idx, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    self.errors[idx].fetch_add(1, Ordering::Relaxed);
                    warn!(
                        provider = %self.name,
                        endpoint = idx,
                        method = method,
                        error = %e,
                        "Endpoint failed, trying next"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl ChainProvider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_transaction(
        &self,
        chain_id: &str,
        from: &str,
        contract: &str,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<ChainTransaction, ChainError> {
        self.call("create_transaction", |p| async move {
            p.create_transaction(chain_id, from, contract, method, params)
                .await
        })
        .await
    }

    async fn sign_transaction(
        &self,
        chain_id: &str,
        tx: ChainTransaction,
    ) -> Result<ChainTransaction, ChainError> {
        self.call("sign_transaction", |p| {
            let tx = tx.clone();
            async move { p.sign_transaction(chain_id, tx).await }
        })
        .await
    }

    async fn send_transaction(&self, chain_id: &str, raw_hex: &str) -> Result<(), ChainError> {
        self.call("send_transaction", |p| async move {
            p.send_transaction(chain_id, raw_hex).await
        })
        .await
    }

    async fn poll_result(
        &self,
        chain_id: &str,
        tx_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<TxResult, ChainError> {
        // The wait itself is bounded by max_wait, not by the per-call timeout
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            match endpoint
                .poll_result(chain_id, tx_id, max_wait, poll_interval)
                .await
            {
                Err(e) if e.is_transient() => {
                    self.errors[idx].fetch_add(1, Ordering::Relaxed);
                    warn!(provider = %self.name, endpoint = idx, error = %e, "poll_result failed, trying next");
                }
                other => return other,
            }
        }
        Ok(TxResult::pending())
    }

    async fn query_transaction(
        &self,
        chain_id: &str,
        tx_id: &str,
    ) -> Result<TxConfirmation, ChainError> {
        self.call("query_transaction", |p| async move {
            p.query_transaction(chain_id, tx_id).await
        })
        .await
    }

    async fn contract_address(&self, chain_id: &str, name: &str) -> Result<String, ChainError> {
        self.call("contract_address", |p| async move {
            p.contract_address(chain_id, name).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainProvider;

    fn fallback(a: Arc<MockChainProvider>, b: Arc<MockChainProvider>) -> FallbackProvider {
        FallbackProvider::new("evm-pool", vec![a, b], Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_transport_error_moves_to_next_endpoint() {
        let a = Arc::new(MockChainProvider::new("a"));
        let b = Arc::new(MockChainProvider::new("b"));
        a.set_send_error(Some(ChainError::Transport("connection refused".into())));

        let pool = fallback(a.clone(), b.clone());
        pool.send_transaction("ETH", "abcd").await.unwrap();

        assert_eq!(a.send_count(), 1);
        assert_eq!(b.send_count(), 1);
        assert_eq!(pool.error_count(0), 1);

        // Sticks with the endpoint that answered
        pool.send_transaction("ETH", "abcd").await.unwrap();
        assert_eq!(a.send_count(), 1);
        assert_eq!(b.send_count(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried_elsewhere() {
        let a = Arc::new(MockChainProvider::new("a"));
        let b = Arc::new(MockChainProvider::new("b"));
        a.set_send_error(Some(ChainError::Rejected("nonce too low".into())));

        let pool = fallback(a.clone(), b.clone());
        let err = pool.send_transaction("ETH", "abcd").await.unwrap_err();

        assert!(matches!(err, ChainError::Rejected(_)));
        assert_eq!(b.send_count(), 0);
    }

    #[tokio::test]
    async fn test_all_endpoints_down() {
        let a = Arc::new(MockChainProvider::new("a"));
        let b = Arc::new(MockChainProvider::new("b"));
        a.set_send_error(Some(ChainError::Transport("down".into())));
        b.set_send_error(Some(ChainError::Transport("down too".into())));

        let pool = fallback(a, b);
        let err = pool.send_transaction("ETH", "abcd").await.unwrap_err();
        assert_eq!(err, ChainError::Transport("down too".into()));
    }
}
