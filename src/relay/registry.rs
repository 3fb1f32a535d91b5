//! Actor registry
//!
//! Maps order ids to live actors, spawning them on first use. Implements
//! [`OrderDriver`], the seam through which callbacks, timers and retries feed
//! orders.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use super::actor::{ActorHandle, ActorMessage, OrderActor};
use super::error::RelayError;
use super::processor::DepositProcessor;
use crate::order::{FlowExtension, OrderStatus, OrderType};

/// Entry point into the per-order actors
#[async_trait]
pub trait OrderDriver: Send + Sync {
    /// Ask the order's actor to process its durable status
    async fn drive(&self, order_id: Uuid) -> Result<(), RelayError>;

    /// Inject `status` into the order.
    ///
    /// Resolves once the status is persisted (`true`) or rejected as stale
    /// (`false`).
    async fn advance(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        note: Option<FlowExtension>,
    ) -> Result<bool, RelayError>;
}

/// Startup recovery summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rewatched: usize,
    pub redriven: usize,
    pub skipped: usize,
}

pub struct ActorRegistry {
    actors: Arc<DashMap<Uuid, ActorHandle>>,
    processor: Arc<DepositProcessor>,
}

impl ActorRegistry {
    pub fn new(processor: Arc<DepositProcessor>) -> Self {
        Self {
            actors: Arc::new(DashMap::new()),
            processor,
        }
    }

    /// Number of live actors
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    fn handle(&self, order_id: Uuid) -> ActorHandle {
        self.actors
            .entry(order_id)
            .or_insert_with(|| {
                OrderActor::spawn(
                    order_id,
                    self.processor.clone(),
                    self.actors.clone(),
                    self.processor.config().actor_inbox_size,
                )
            })
            .clone()
    }

    /// Deliver to the order's actor, replacing an actor that already stopped
    async fn send(&self, order_id: Uuid, msg: ActorMessage) -> Result<(), RelayError> {
        let handle = self.handle(order_id);
        let msg = match handle.tx.send(msg).await {
            Ok(()) => return Ok(()),
            Err(mpsc::error::SendError(msg)) => msg,
        };

        self.actors
            .remove_if(&order_id, |_, h| h.tx.same_channel(&handle.tx));
        self.handle(order_id)
            .tx
            .send(msg)
            .await
            .map_err(|_| RelayError::ActorUnavailable(order_id))
    }

    /// Resume every non-terminal deposit order after a restart.
    ///
    /// Orders already handed to a confirmation timer get their watch back
    /// directly; the watch map itself is not durable. Everything else is
    /// re-driven from its stored status.
    pub async fn recover(&self) -> Result<RecoveryReport, RelayError> {
        let orders = self.processor.store().list_active().await?;
        let mut report = RecoveryReport::default();

        for order in orders {
            if order.order_type != OrderType::Deposit || order.status.is_source_leg() {
                report.skipped += 1;
                continue;
            }

            if order.status.is_awaiting_confirmation()
                && order.extension.is_forward == Some(true)
                && self.processor.rewatch(&order)
            {
                report.rewatched += 1;
                continue;
            }

            match self.drive(order.id).await {
                Ok(()) => report.redriven += 1,
                Err(e) => warn!(order_id = %order.id, error = %e, "Failed to re-drive order"),
            }
        }

        info!(
            rewatched = report.rewatched,
            redriven = report.redriven,
            skipped = report.skipped,
            "Recovery finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl OrderDriver for ActorRegistry {
    async fn drive(&self, order_id: Uuid) -> Result<(), RelayError> {
        self.send(order_id, ActorMessage::Drive).await
    }

    async fn advance(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        note: Option<FlowExtension>,
    ) -> Result<bool, RelayError> {
        let (ack, rx) = oneshot::channel();
        self.send(order_id, ActorMessage::Advance { status, note, ack })
            .await?;
        rx.await
            .map_err(|_| RelayError::ActorUnavailable(order_id))?
    }
}
