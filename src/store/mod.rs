//! Order and Status-Flow Persistence
//!
//! Two async repository traits abstract durable state so the order actor,
//! timers and callback handler can run against PostgreSQL in production and
//! an in-memory map in tests and local runs.
//!
//! # Invariants
//!
//! 1. **Unique third-party id**: `insert_if_absent` never creates a second order
//!    for the same `(third_party_service, third_party_order_id)`.
//! 2. **Capped flow**: a status-flow never exceeds [`MAX_FLOW_ENTRIES`]; the
//!    201st append fails and leaves the existing entries untouched.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::order::{FlowExtension, Order, OrderStatus, StatusFlowEntry};

pub use memory::{InMemoryFlowStore, InMemoryOrderStore};
pub use postgres::{PgFlowStore, PgOrderStore};

/// Maximum status-flow entries per order
pub const MAX_FLOW_ENTRIES: usize = 200;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Status flow for order {order_id} is full ({cap} entries)")]
    FlowCapExceeded { order_id: Uuid, cap: usize },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable order records
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert unless an order with the same third-party id exists.
    ///
    /// Returns `false` (and writes nothing) on a duplicate.
    async fn insert_if_absent(&self, order: &Order) -> Result<bool, StoreError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn get_by_third_party_id(
        &self,
        service: &str,
        third_party_order_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// Overwrite an existing order
    async fn update(&self, order: &Order) -> Result<(), StoreError>;

    /// All orders not yet in a terminal status
    async fn list_active(&self) -> Result<Vec<Order>, StoreError>;
}

/// Append-only status-flow log
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Append one entry and return the full flow.
    ///
    /// Fails with [`StoreError::FlowCapExceeded`] once [`MAX_FLOW_ENTRIES`] exist.
    async fn append(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extension: Option<FlowExtension>,
    ) -> Result<Vec<StatusFlowEntry>, StoreError>;

    /// Entries in append order
    async fn read(&self, order_id: Uuid) -> Result<Vec<StatusFlowEntry>, StoreError>;
}
