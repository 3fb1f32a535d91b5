//! Status-Flow Recorder
//!
//! Append-only, capped audit trail of every status an order passes through.
//! The flow doubles as the retry ledger: attempt counts are derived by counting
//! entries, never kept in a separate counter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::status::OrderStatus;
use super::types::now_millis;
use crate::store::{FlowStore, StoreError};

/// Key/value snapshot attached to a flow entry
pub type FlowExtension = BTreeMap<String, String>;

/// Flow extension key holding the error that routed an order to a failure branch
pub const FLOW_KEY_ERROR: &str = "Error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlowEntry {
    pub status: OrderStatus,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<FlowExtension>,
}

impl StatusFlowEntry {
    pub fn new(status: OrderStatus, extension: Option<FlowExtension>) -> Self {
        Self {
            status,
            timestamp: now_millis(),
            extension,
        }
    }
}

/// Number of times `status` appears in `flow`
pub fn count_status(flow: &[StatusFlowEntry], status: OrderStatus) -> usize {
    flow.iter().filter(|entry| entry.status == status).count()
}

/// Front for the flow store used by the order actor and retry coordinator
#[derive(Clone)]
pub struct StatusFlowRecorder {
    store: Arc<dyn FlowStore>,
}

impl StatusFlowRecorder {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Append an entry; fails explicitly once the flow is full
    pub async fn append(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extension: Option<FlowExtension>,
    ) -> Result<Vec<StatusFlowEntry>, StoreError> {
        self.store.append(order_id, status, extension).await
    }

    pub async fn read(&self, order_id: Uuid) -> Result<Vec<StatusFlowEntry>, StoreError> {
        self.store.read(order_id).await
    }

    /// Prior visits of `status` in the order's flow
    pub async fn count(&self, order_id: Uuid, status: OrderStatus) -> Result<usize, StoreError> {
        let flow = self.store.read(order_id).await?;
        Ok(count_status(&flow, status))
    }
}
