//! JSON-RPC chain provider
//!
//! Talks to a chain gateway (node plus signer) over HTTP JSON-RPC. One instance
//! serves every chain of a family; the chain id travels in each call.
//!
//! Error mapping:
//! - HTTP failure or timeout -> [`ChainError::Transport`]
//! - JSON-RPC error object -> [`ChainError::Rejected`]
//! - unreadable body -> [`ChainError::InvalidResponse`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{ChainError, ChainProvider, ChainTransaction, TxConfirmation, TxResult, TxResultStatus};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    tx_id: String,
    raw: String,
    #[serde(default)]
    signed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResult {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfirmation {
    status: String,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    confirmations: u32,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_result_status(status: &str) -> TxResultStatus {
    match status {
        "MINED" => TxResultStatus::Mined,
        "NODEVALIDATIONFAILED" => TxResultStatus::NodeValidationFailed,
        "PENDING_VALIDATION" => TxResultStatus::PendingValidation,
        "NOTEXISTED" => TxResultStatus::NotExisted,
        "FAILED" => TxResultStatus::Failed,
        _ => TxResultStatus::Pending,
    }
}

fn to_confirmation(raw: RawConfirmation) -> TxConfirmation {
    match parse_result_status(&raw.status) {
        TxResultStatus::Mined => TxConfirmation::Mined {
            height: raw.block_height.unwrap_or(0),
            confirmations: raw.confirmations,
            block_hash: raw.block_hash,
        },
        TxResultStatus::NotExisted => TxConfirmation::NotFound,
        TxResultStatus::NodeValidationFailed | TxResultStatus::Failed => {
            TxConfirmation::Failed(raw.error.unwrap_or(raw.status))
        }
        TxResultStatus::Pending | TxResultStatus::PendingValidation => TxConfirmation::Pending,
    }
}

pub struct JsonRpcProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc_call<R>(&self, method: &str, params: Value) -> Result<R, ChainError>
    where
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{} HTTP request failed: {}", method, e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Rejected(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| ChainError::InvalidResponse(format!("{}: no result", method)))
    }

    async fn tx_result(&self, chain_id: &str, tx_id: &str) -> Result<TxResult, ChainError> {
        let raw: RawResult = self
            .rpc_call(
                "relay_getTransactionResult",
                json!({ "chainId": chain_id, "txId": tx_id }),
            )
            .await?;
        Ok(TxResult {
            status: parse_result_status(&raw.status),
            error: raw.error,
            block_height: raw.block_height,
        })
    }
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_transaction(
        &self,
        chain_id: &str,
        from: &str,
        contract: &str,
        method: &str,
        params: &Value,
    ) -> Result<ChainTransaction, ChainError> {
        let raw: RawTransaction = self
            .rpc_call(
                "relay_createTransaction",
                json!({
                    "chainId": chain_id,
                    "from": from,
                    "contract": contract,
                    "method": method,
                    "params": params,
                }),
            )
            .await?;
        Ok(ChainTransaction {
            tx_id: raw.tx_id,
            raw_hex: raw.raw,
            signed: raw.signed,
        })
    }

    async fn sign_transaction(
        &self,
        chain_id: &str,
        tx: ChainTransaction,
    ) -> Result<ChainTransaction, ChainError> {
        if tx.signed {
            return Ok(tx);
        }
        let raw: RawTransaction = self
            .rpc_call(
                "relay_signTransaction",
                json!({ "chainId": chain_id, "txId": tx.tx_id, "raw": tx.raw_hex }),
            )
            .await
            .map_err(|e| match e {
                ChainError::Rejected(reason) => ChainError::Signing(reason),
                other => other,
            })?;
        Ok(ChainTransaction {
            tx_id: raw.tx_id,
            raw_hex: raw.raw,
            signed: true,
        })
    }

    async fn send_transaction(&self, chain_id: &str, raw_hex: &str) -> Result<(), ChainError> {
        let _: Value = self
            .rpc_call(
                "relay_sendTransaction",
                json!({ "chainId": chain_id, "raw": raw_hex }),
            )
            .await?;
        Ok(())
    }

    async fn poll_result(
        &self,
        chain_id: &str,
        tx_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<TxResult, ChainError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let result = self.tx_result(chain_id, tx_id).await?;
            match result.status {
                TxResultStatus::Mined
                | TxResultStatus::NodeValidationFailed
                | TxResultStatus::Failed => return Ok(result),
                status => debug!(tx_id = %tx_id, status = ?status, "Transaction not final"),
            }
            if Instant::now() + poll_interval > deadline {
                return Ok(result);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn query_transaction(
        &self,
        chain_id: &str,
        tx_id: &str,
    ) -> Result<TxConfirmation, ChainError> {
        let raw: RawConfirmation = self
            .rpc_call(
                "relay_getTransaction",
                json!({ "chainId": chain_id, "txId": tx_id }),
            )
            .await?;
        Ok(to_confirmation(raw))
    }

    async fn contract_address(&self, chain_id: &str, name: &str) -> Result<String, ChainError> {
        self.rpc_call(
            "relay_getContractAddress",
            json!({ "chainId": chain_id, "name": name }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_status_parsing() {
        assert_eq!(parse_result_status("MINED"), TxResultStatus::Mined);
        assert_eq!(
            parse_result_status("NODEVALIDATIONFAILED"),
            TxResultStatus::NodeValidationFailed
        );
        assert_eq!(parse_result_status("NOTEXISTED"), TxResultStatus::NotExisted);
        assert_eq!(parse_result_status("SOMETHING_NEW"), TxResultStatus::Pending);
    }

    #[test]
    fn test_confirmation_mapping() {
        let mined: RawConfirmation = serde_json::from_str(
            r#"{"status":"MINED","blockHeight":120,"confirmations":8,"blockHash":"0xabc"}"#,
        )
        .unwrap();
        assert_eq!(
            to_confirmation(mined),
            TxConfirmation::Mined {
                height: 120,
                confirmations: 8,
                block_hash: Some("0xabc".to_string()),
            }
        );

        let missing: RawConfirmation = serde_json::from_str(r#"{"status":"NOTEXISTED"}"#).unwrap();
        assert_eq!(to_confirmation(missing), TxConfirmation::NotFound);

        let failed: RawConfirmation =
            serde_json::from_str(r#"{"status":"FAILED","error":"out of gas"}"#).unwrap();
        assert_eq!(
            to_confirmation(failed),
            TxConfirmation::Failed("out of gas".to_string())
        );
    }

    #[test]
    fn test_rpc_error_envelope() {
        let resp: JsonRpcResponse<Value> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"insufficient balance"}}"#,
        )
        .unwrap();
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "insufficient balance");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let provider =
            JsonRpcProvider::new("aelf", "http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let err = provider
            .send_transaction("tDVV", "deadbeef")
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {:?}", err);
    }
}
