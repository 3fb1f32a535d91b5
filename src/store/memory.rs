//! In-memory stores
//!
//! DashMap-backed implementations. Per-key operations hold the shard lock for
//! their whole read-check-write, which is what makes `insert_if_absent` and the
//! flow cap check atomic.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{FlowStore, MAX_FLOW_ENTRIES, OrderStore, StoreError};
use crate::order::{FlowExtension, Order, OrderStatus, StatusFlowEntry};

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    /// (service, third-party id) -> order id
    third_party_index: DashMap<(String, String), Uuid>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_if_absent(&self, order: &Order) -> Result<bool, StoreError> {
        let key = (
            order.third_party_service.clone(),
            order.third_party_order_id.clone(),
        );
        match self.third_party_index.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                self.orders.insert(order.id, order.clone());
                slot.insert(order.id);
                Ok(true)
            }
        }
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&order_id).map(|o| o.clone()))
    }

    async fn get_by_third_party_id(
        &self,
        service: &str,
        third_party_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let key = (service.to_string(), third_party_order_id.to_string());
        let Some(order_id) = self.third_party_index.get(&key).map(|id| *id) else {
            return Ok(None);
        };
        self.get(order_id).await
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        match self.orders.get_mut(&order.id) {
            Some(mut existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::OrderNotFound(order.id)),
        }
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .map(|o| o.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<Uuid, Vec<StatusFlowEntry>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn append(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extension: Option<FlowExtension>,
    ) -> Result<Vec<StatusFlowEntry>, StoreError> {
        let mut flow = self.flows.entry(order_id).or_default();
        if flow.len() >= MAX_FLOW_ENTRIES {
            return Err(StoreError::FlowCapExceeded {
                order_id,
                cap: MAX_FLOW_ENTRIES,
            });
        }
        flow.push(StatusFlowEntry::new(status, extension));
        Ok(flow.clone())
    }

    async fn read(&self, order_id: Uuid) -> Result<Vec<StatusFlowEntry>, StoreError> {
        Ok(self
            .flows
            .get(&order_id)
            .map(|f| f.clone())
            .unwrap_or_default())
    }
}
