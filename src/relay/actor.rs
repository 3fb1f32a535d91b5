//! Per-order actor
//!
//! One tokio task per live order, fed through a bounded inbox. Inputs are
//! handled strictly one at a time. Each input reloads the order from the
//! store, so the actor never trusts state that wasn't persisted.
//!
//! Continuation is an explicit loop: after a step changes the status the new
//! status is processed next, up to `max_drive_steps` times per input.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::RelayError;
use super::processor::{DepositProcessor, Step};
use crate::notify::{params, templates};
use crate::order::{FlowExtension, Order, OrderStatus};

#[derive(Debug)]
pub enum ActorMessage {
    /// Process the order from its durable status
    Drive,
    /// Replace the status, persist it, then continue
    Advance {
        status: OrderStatus,
        note: Option<FlowExtension>,
        /// Answered once the injected status is persisted (or rejected)
        ack: oneshot::Sender<Result<bool, RelayError>>,
    },
}

/// Inbox sender kept in the registry
#[derive(Clone)]
pub struct ActorHandle {
    pub(crate) tx: mpsc::Sender<ActorMessage>,
}

pub struct OrderActor {
    order_id: Uuid,
    rx: mpsc::Receiver<ActorMessage>,
    processor: Arc<DepositProcessor>,
    /// Registry map, so the actor can remove itself when done
    actors: Arc<DashMap<Uuid, ActorHandle>>,
    self_tx: mpsc::Sender<ActorMessage>,
}

impl OrderActor {
    pub fn spawn(
        order_id: Uuid,
        processor: Arc<DepositProcessor>,
        actors: Arc<DashMap<Uuid, ActorHandle>>,
        inbox_size: usize,
    ) -> ActorHandle {
        let (tx, rx) = mpsc::channel(inbox_size.max(1));
        let actor = OrderActor {
            order_id,
            rx,
            processor,
            actors,
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run());
        ActorHandle { tx }
    }

    async fn run(mut self) {
        debug!(order_id = %self.order_id, "Order actor started");

        while let Some(msg) = self.rx.recv().await {
            let done = match msg {
                ActorMessage::Drive => self.handle(None).await,
                ActorMessage::Advance { status, note, ack } => {
                    self.handle(Some((status, note, ack))).await
                }
            };
            if done {
                break;
            }
        }

        // Only remove our own entry; a fresh actor may already own the slot
        self.actors
            .remove_if(&self.order_id, |_, h| h.tx.same_channel(&self.self_tx));
        debug!(order_id = %self.order_id, "Order actor stopped");
    }

    /// Returns true once the order is terminal
    async fn handle(
        &mut self,
        injected: Option<(OrderStatus, Option<FlowExtension>, oneshot::Sender<Result<bool, RelayError>>)>,
    ) -> bool {
        let mut order = match self.load().await {
            Ok(order) => order,
            Err(e) => {
                error!(order_id = %self.order_id, error = %e, "Failed to load order");
                if let Some((_, _, ack)) = injected {
                    let _ = ack.send(Err(e));
                }
                return false;
            }
        };

        if let Some((status, note, ack)) = injected {
            let result = self.processor.inject(&mut order, status, note).await;
            let accepted = matches!(result, Ok(true));
            let _ = ack.send(result);
            if !accepted {
                return order.status.is_terminal();
            }
        }

        self.drive(&mut order).await
    }

    async fn load(&self) -> Result<Order, RelayError> {
        self.processor
            .store()
            .get(self.order_id)
            .await?
            .ok_or(RelayError::OrderNotFound(self.order_id))
    }

    async fn drive(&self, order: &mut Order) -> bool {
        let max_steps = self.processor.config().max_drive_steps;

        for _ in 0..max_steps {
            match self.processor.process(order).await {
                Ok(Step::Continue) => continue,
                Ok(Step::Wait) | Ok(Step::Ignored) => return false,
                Ok(Step::Terminal) => {
                    info!(order_id = %order.id, status = %order.status, "Order reached terminal status");
                    return true;
                }
                Err(e) => {
                    // Durable state is intact; the next input or recovery resumes it
                    error!(order_id = %order.id, status = %order.status, error = %e, "Order step failed");
                    return false;
                }
            }
        }

        warn!(
            order_id = %order.id,
            status = %order.status,
            max_steps = max_steps,
            "Drive step limit reached, order stuck"
        );
        if self.processor.config().alarm_on_stuck {
            self.processor
                .alarms()
                .raise(
                    templates::STUCK_ORDER,
                    params([
                        ("order_id", order.id.to_string()),
                        ("status", order.status.to_string()),
                        ("max_steps", max_steps.to_string()),
                    ]),
                )
                .await;
        }
        false
    }
}
