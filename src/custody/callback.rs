//! Custody Callback Handler
//!
//! # Flow
//!
//! 1. Verify the Ed25519 signature over `body|timestamp`; nothing happens on failure
//! 2. Map the provider coin code (unmapped coins alarm once per transaction)
//! 3. `pending`: snapshot + custody polling registration, no order
//! 4. `success`: re-fetch from the provider, require agreement, create the order
//!    at `FromTransferConfirmed` and hand it to its actor
//!
//! The provider redelivers callbacks; the third-party id uniqueness of the order
//! store makes every repeat a no-op.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{CustodyClient, CustodyClientError};
use super::coin_map::CoinMap;
use super::poller::CustodyPollerHandle;
use super::routes::DepositRoutes;
use super::signature::CallbackVerifier;
use super::snapshot::SnapshotStore;
use super::types::CustodyTransaction;
use crate::config::{CoinMapping, CustodyConfig};
use crate::notify::{Alarms, params, templates};
use crate::order::{
    FlowExtension, Order, StatusFlowRecorder, TransferInfo, TransferStatus, now_millis,
};
use crate::relay::OrderDriver;
use crate::store::{OrderStore, StoreError};

#[derive(Error, Debug, Clone)]
pub enum CallbackError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Callback timestamp outside allowed window: {0}")]
    StaleTimestamp(String),

    #[error("Invalid callback payload: {0}")]
    InvalidPayload(String),

    #[error("Callback disagrees with custody record: {0}")]
    Mismatch(String),

    #[error("No deposit route for {network}/{address}")]
    UnknownDepositAddress { network: String, address: String },

    #[error(transparent)]
    Custody(#[from] CustodyClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CallbackError {
    pub fn code(&self) -> &'static str {
        match self {
            CallbackError::MissingHeader(_) => "MISSING_HEADER",
            CallbackError::InvalidSignature => "INVALID_SIGNATURE",
            CallbackError::StaleTimestamp(_) => "STALE_TIMESTAMP",
            CallbackError::InvalidPayload(_) => "INVALID_PAYLOAD",
            CallbackError::Mismatch(_) => "CUSTODY_MISMATCH",
            CallbackError::UnknownDepositAddress { .. } => "UNKNOWN_DEPOSIT_ADDRESS",
            CallbackError::Custody(_) => "CUSTODY_UNAVAILABLE",
            CallbackError::Store(_) => "STORE_ERROR",
        }
    }

    /// Worth asking again later; the rest will fail the same way every time
    pub fn is_transient(&self) -> bool {
        match self {
            CallbackError::Custody(e) => !matches!(e, CustodyClientError::NotFound(_)),
            CallbackError::Store(_) => true,
            _ => false,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CallbackError::MissingHeader(_) | CallbackError::InvalidPayload(_) => 400,
            CallbackError::InvalidSignature | CallbackError::StaleTimestamp(_) => 401,
            CallbackError::Mismatch(_) | CallbackError::UnknownDepositAddress { .. } => 422,
            CallbackError::Custody(_) => 502,
            CallbackError::Store(_) => 503,
        }
    }
}

/// What a callback led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Verified but nothing to do (wrong side, unmapped coin, failed transfer)
    Ignored(String),
    /// Snapshot updated, order not created yet
    Pending { updates: u64 },
    Created(Uuid),
    /// Order already exists for this provider transaction
    Duplicate(Uuid),
}

/// Collaborators of the handler
pub struct CallbackDeps {
    pub store: Arc<dyn OrderStore>,
    pub flow: StatusFlowRecorder,
    pub driver: Arc<dyn OrderDriver>,
    pub client: Arc<dyn CustodyClient>,
    pub routes: Arc<dyn DepositRoutes>,
    pub alarms: Alarms,
    pub poller: CustodyPollerHandle,
}

pub struct CustodyCallbackHandler {
    verifier: CallbackVerifier,
    coins: CoinMap,
    snapshots: SnapshotStore,
    service_name: String,
    max_clock_skew_secs: i64,
    order_ttl_ms: i64,
    deps: CallbackDeps,
}

impl CustodyCallbackHandler {
    pub fn new(
        config: &CustodyConfig,
        order_ttl_secs: u64,
        deps: CallbackDeps,
    ) -> Result<Self, String> {
        Ok(Self {
            verifier: CallbackVerifier::from_hex(&config.public_key)?,
            coins: CoinMap::new(config.coins.iter().cloned()),
            snapshots: SnapshotStore::new(),
            service_name: config.service_name.clone(),
            max_clock_skew_secs: config.max_clock_skew_secs,
            order_ttl_ms: (order_ttl_secs as i64).saturating_mul(1000),
            deps,
        })
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Forget payloads not seen for an order lifetime
    pub fn prune_snapshots(&self) -> usize {
        let max_age = Duration::from_millis(self.order_ttl_ms.max(0) as u64);
        let pruned = self.snapshots.prune(max_age);
        if pruned > 0 {
            debug!(pruned = pruned, remaining = self.snapshots.len(), "Custody snapshots pruned");
        }
        pruned
    }

    /// Entry point for a raw webhook delivery
    pub async fn handle(
        &self,
        body: &str,
        timestamp: &str,
        signature: &str,
    ) -> Result<CallbackOutcome, CallbackError> {
        if !self.verifier.verify(body, timestamp, signature) {
            warn!(timestamp = %timestamp, "Rejected custody callback with bad signature");
            return Err(CallbackError::InvalidSignature);
        }
        self.check_timestamp(timestamp)?;

        let transaction: CustodyTransaction = serde_json::from_str(body)
            .map_err(|e| CallbackError::InvalidPayload(e.to_string()))?;

        info!(
            tx_id = %transaction.id,
            coin = %transaction.coin,
            status = %transaction.status,
            "Custody callback verified"
        );
        self.observe(&transaction).await
    }

    fn check_timestamp(&self, timestamp: &str) -> Result<(), CallbackError> {
        if self.max_clock_skew_secs <= 0 {
            return Ok(());
        }
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| CallbackError::StaleTimestamp(timestamp.to_string()))?;
        if (now_millis() - ts).abs() > self.max_clock_skew_secs.saturating_mul(1000) {
            return Err(CallbackError::StaleTimestamp(timestamp.to_string()));
        }
        Ok(())
    }

    async fn observe(
        &self,
        transaction: &CustodyTransaction,
    ) -> Result<CallbackOutcome, CallbackError> {
        if !transaction.is_deposit() {
            return Ok(CallbackOutcome::Ignored(format!("side {}", transaction.side)));
        }

        let Some(mapping) = self.mapping_for(transaction).await else {
            return Ok(CallbackOutcome::Ignored(format!(
                "unmapped coin {}",
                transaction.coin
            )));
        };

        if transaction.is_pending() {
            let updates = self.snapshots.record(transaction);
            self.deps.poller.register(&transaction.id, None);
            return Ok(CallbackOutcome::Pending { updates });
        }

        if !transaction.is_success() {
            // Terminal without success: nothing will settle it
            self.snapshots.remove(&transaction.id);
            self.deps.poller.unregister(Some(transaction.id.clone()), None);
            return Ok(CallbackOutcome::Ignored(format!(
                "status {}",
                transaction.status
            )));
        }

        if let Some(existing) = self.existing_order(&transaction.id).await? {
            return Ok(CallbackOutcome::Duplicate(existing));
        }

        // The callback body alone never settles a deposit
        let fetched = self.deps.client.get_transaction(&transaction.id).await?;
        transaction
            .check_agrees_with(&fetched)
            .map_err(CallbackError::Mismatch)?;

        self.create_order(&fetched, mapping).await
    }

    /// Settle a transaction fetched straight from the provider (custody polling)
    pub async fn accept_fetched(
        &self,
        transaction: &CustodyTransaction,
    ) -> Result<CallbackOutcome, CallbackError> {
        if !transaction.is_success() {
            return Ok(CallbackOutcome::Ignored(format!(
                "status {}",
                transaction.status
            )));
        }
        let Some(mapping) = self.mapping_for(transaction).await else {
            return Ok(CallbackOutcome::Ignored(format!(
                "unmapped coin {}",
                transaction.coin
            )));
        };
        if let Some(existing) = self.existing_order(&transaction.id).await? {
            return Ok(CallbackOutcome::Duplicate(existing));
        }
        self.create_order(transaction, mapping).await
    }

    async fn mapping_for(&self, transaction: &CustodyTransaction) -> Option<&CoinMapping> {
        let mapping = self.coins.lookup(&transaction.coin);
        if mapping.is_none() {
            warn!(tx_id = %transaction.id, coin = %transaction.coin, "Custody coin not mapped");
            if self.snapshots.claim_unmapped_alarm(transaction) {
                self.deps
                    .alarms
                    .raise(
                        templates::UNMAPPED_COIN,
                        params([
                            ("tx_id", transaction.id.clone()),
                            ("coin", transaction.coin.clone()),
                            ("address", transaction.address.clone()),
                        ]),
                    )
                    .await;
            }
        }
        mapping
    }

    async fn existing_order(&self, tx_id: &str) -> Result<Option<Uuid>, CallbackError> {
        Ok(self
            .deps
            .store
            .get_by_third_party_id(&self.service_name, tx_id)
            .await?
            .map(|o| o.id))
    }

    async fn create_order(
        &self,
        transaction: &CustodyTransaction,
        mapping: &CoinMapping,
    ) -> Result<CallbackOutcome, CallbackError> {
        let amount = transaction
            .whole_amount()
            .map_err(CallbackError::InvalidPayload)?;

        if let Some(min) = mapping.min_amount.filter(|min| amount < *min) {
            warn!(tx_id = %transaction.id, amount = %amount, min = %min, "Deposit below minimum");
            return Ok(CallbackOutcome::Ignored(format!("amount {} below minimum {}", amount, min)));
        }

        let route = self
            .deps
            .routes
            .resolve(&mapping.network, &transaction.address)
            .await
            .ok_or_else(|| CallbackError::UnknownDepositAddress {
                network: mapping.network.clone(),
                address: transaction.address.clone(),
            })?;

        let from = TransferInfo {
            network: mapping.network.clone(),
            chain_id: mapping.chain_id.clone(),
            tx_id: Some(transaction.txid.clone()).filter(|t| !t.is_empty()),
            tx_time: Some(transaction.created_time).filter(|t| *t > 0),
            symbol: mapping.symbol.clone(),
            amount,
            status: TransferStatus::Confirmed,
            from_address: transaction.source_address.clone(),
            to_address: transaction.address.clone(),
            ..Default::default()
        };
        let to = TransferInfo {
            network: route.to_network.clone(),
            chain_id: route.to_chain_id.clone(),
            symbol: route.to_symbol.clone(),
            amount,
            to_address: route.to_address.clone(),
            ..Default::default()
        };

        let order = Order::new_deposit(
            route.user_id,
            self.service_name.clone(),
            transaction.id.clone(),
            from,
            to,
            self.order_ttl_ms,
        );

        if !self.deps.store.insert_if_absent(&order).await? {
            let existing = self.existing_order(&transaction.id).await?.unwrap_or(order.id);
            info!(tx_id = %transaction.id, order_id = %existing, "Duplicate custody deposit ignored");
            return Ok(CallbackOutcome::Duplicate(existing));
        }

        let note = FlowExtension::from([
            ("CustodyTxId".to_string(), transaction.id.clone()),
            ("SourceTxId".to_string(), transaction.txid.clone()),
        ]);
        if let Err(e) = self.deps.flow.append(order.id, order.status, Some(note)).await {
            warn!(order_id = %order.id, error = %e, "Status flow append failed");
        }

        self.snapshots.remove(&transaction.id);
        self.deps.poller.unregister(Some(transaction.id.clone()), None);

        info!(
            order_id = %order.id,
            tx_id = %transaction.id,
            user_id = order.user_id,
            symbol = %order.from_transfer.symbol,
            amount = %amount,
            need_swap = order.extension.need_swap,
            "Deposit order created"
        );

        // The order is durable; if the actor can't take it now, recovery will
        if let Err(e) = self.deps.driver.drive(order.id).await {
            warn!(order_id = %order.id, error = %e, "Failed to hand order to its actor");
        }

        Ok(CallbackOutcome::Created(order.id))
    }
}
