//! In-process chain provider for tests and the `mock-api` binary

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{ChainError, ChainProvider, ChainTransaction, TxConfirmation, TxResult, TxResultStatus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A call recorded by [`MockChainProvider::create_transaction`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCall {
    pub chain_id: String,
    pub from: String,
    pub contract: String,
    pub method: String,
    pub params: serde_json::Value,
}

pub struct MockChainProvider {
    name: String,
    create_count: AtomicUsize,
    sign_count: AtomicUsize,
    send_count: AtomicUsize,
    query_count: AtomicUsize,
    created: Mutex<Vec<CreatedCall>>,
    sent: Mutex<Vec<String>>,
    /// Configured behavior
    create_error: Mutex<Option<ChainError>>,
    send_error: Mutex<Option<ChainError>>,
    poll_status: Mutex<TxResultStatus>,
    poll_hangs: Mutex<bool>,
    default_confirmation: Mutex<TxConfirmation>,
    confirmations: Mutex<HashMap<String, TxConfirmation>>,
}

impl MockChainProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_count: AtomicUsize::new(0),
            sign_count: AtomicUsize::new(0),
            send_count: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            create_error: Mutex::new(None),
            send_error: Mutex::new(None),
            poll_status: Mutex::new(TxResultStatus::Mined),
            poll_hangs: Mutex::new(false),
            default_confirmation: Mutex::new(TxConfirmation::Mined {
                height: 100,
                confirmations: 64,
                block_hash: Some("mock-block".to_string()),
            }),
            confirmations: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_create_error(&self, error: Option<ChainError>) {
        *lock(&self.create_error) = error;
    }

    pub fn set_send_error(&self, error: Option<ChainError>) {
        *lock(&self.send_error) = error;
    }

    pub fn set_poll_status(&self, status: TxResultStatus) {
        *lock(&self.poll_status) = status;
    }

    /// Make `poll_result` never return
    pub fn set_poll_hangs(&self, hangs: bool) {
        *lock(&self.poll_hangs) = hangs;
    }

    pub fn set_default_confirmation(&self, confirmation: TxConfirmation) {
        *lock(&self.default_confirmation) = confirmation;
    }

    pub fn set_confirmation(&self, tx_id: &str, confirmation: TxConfirmation) {
        lock(&self.confirmations).insert(tx_id.to_string(), confirmation);
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<CreatedCall> {
        lock(&self.created).clone()
    }

    /// Raw bytes passed to `send_transaction`, in order
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
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
        let n = self.create_count.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.create_error).clone() {
            return Err(e);
        }

        lock(&self.created).push(CreatedCall {
            chain_id: chain_id.to_string(),
            from: from.to_string(),
            contract: contract.to_string(),
            method: method.to_string(),
            params: params.clone(),
        });

        let body = format!("{}|{}|{}|{}|{}", n, chain_id, contract, method, params);
        Ok(ChainTransaction {
            tx_id: format!("{}-tx-{:08x}", self.name, n),
            raw_hex: hex::encode(body),
            signed: false,
        })
    }

    async fn sign_transaction(
        &self,
        _chain_id: &str,
        mut tx: ChainTransaction,
    ) -> Result<ChainTransaction, ChainError> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        if !tx.signed {
            tx.raw_hex.push_str(&hex::encode("|signed"));
            tx.signed = true;
        }
        Ok(tx)
    }

    async fn send_transaction(&self, _chain_id: &str, raw_hex: &str) -> Result<(), ChainError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.send_error).clone() {
            return Err(e);
        }
        lock(&self.sent).push(raw_hex.to_string());
        Ok(())
    }

    async fn poll_result(
        &self,
        _chain_id: &str,
        _tx_id: &str,
        _max_wait: Duration,
        _poll_interval: Duration,
    ) -> Result<TxResult, ChainError> {
        if *lock(&self.poll_hangs) {
            std::future::pending::<()>().await;
        }
        let status = *lock(&self.poll_status);
        Ok(TxResult {
            status,
            error: (status == TxResultStatus::NodeValidationFailed)
                .then(|| "mock validation failure".to_string()),
            block_height: (status == TxResultStatus::Mined).then_some(100),
        })
    }

    async fn query_transaction(
        &self,
        _chain_id: &str,
        tx_id: &str,
    ) -> Result<TxConfirmation, ChainError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let specific = lock(&self.confirmations).get(tx_id).cloned();
        Ok(specific.unwrap_or_else(|| lock(&self.default_confirmation).clone()))
    }

    async fn contract_address(&self, chain_id: &str, name: &str) -> Result<String, ChainError> {
        Ok(format!("{}_{}_{}", self.name, chain_id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_records_calls() {
        let provider = MockChainProvider::new("mock");
        let params = serde_json::json!({"amount": 1});

        let tx = provider
            .create_transaction("tDVV", "from", "pool", "ReleaseAsset", &params)
            .await
            .unwrap();
        let signed = provider.sign_transaction("tDVV", tx.clone()).await.unwrap();
        assert!(signed.signed);
        assert_eq!(signed.tx_id, tx.tx_id);

        // Signing twice leaves the bytes alone
        let again = provider.sign_transaction("tDVV", signed.clone()).await.unwrap();
        assert_eq!(again.raw_hex, signed.raw_hex);

        provider.send_transaction("tDVV", &signed.raw_hex).await.unwrap();
        assert_eq!(provider.sent(), vec![signed.raw_hex]);
        assert_eq!(provider.created()[0].params, params);
    }
}
