//! Deposit Relay
//!
//! One actor per order drives the deposit state machine from
//! `FromTransferConfirmed` to a terminal status.
//!
//! # Architecture
//!
//! ```text
//! callback / timers / retry
//!        │  OrderDriver::{drive, advance}
//!        ▼
//! ActorRegistry ──spawn──▶ OrderActor (bounded inbox, one per order)
//!                               │ reload from store, then
//!                               ▼
//!                        DepositProcessor::process
//!                               │
//!          ┌────────────────────┼───────────────────┐
//!          ▼                    ▼                   ▼
//!     swap / release     confirmation timer     retry loop
//! ```
//!
//! # Invariants
//!
//! 1. An order is only ever mutated inside its own actor.
//! 2. Every status change is persisted before it is acted on.
//! 3. A stored signed transaction is replayed, never rebuilt, until the
//!    attempt is explicitly cleared.

pub mod actor;
pub mod error;
pub mod processor;
pub mod registry;

#[cfg(test)]
mod integration_tests;

pub use actor::{ActorHandle, ActorMessage, OrderActor};
pub use error::RelayError;
pub use processor::{
    DepositProcessor, ProcessorDeps, Step, TimerHandles, accepts_injected, to_chain_amount,
};
pub use registry::{ActorRegistry, OrderDriver, RecoveryReport};

#[cfg(any(test, feature = "mock-api"))]
pub mod mock {
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    use super::{OrderDriver, RelayError};
    use crate::order::{FlowExtension, OrderStatus};

    /// Records what the loops hand to the actors
    #[derive(Default)]
    pub struct RecordingDriver {
        drives: Mutex<Vec<Uuid>>,
        advances: Mutex<Vec<(Uuid, OrderStatus, Option<FlowExtension>)>>,
        fail: AtomicBool,
    }

    impl RecordingDriver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail as if the actor were gone
        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn drives(&self) -> Vec<Uuid> {
            self.drives.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// Accepted advances, in order
        pub fn advances(&self) -> Vec<(Uuid, OrderStatus, Option<FlowExtension>)> {
            self.advances
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl OrderDriver for RecordingDriver {
        async fn drive(&self, order_id: Uuid) -> Result<(), RelayError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RelayError::ActorUnavailable(order_id));
            }
            self.drives
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(order_id);
            Ok(())
        }

        async fn advance(
            &self,
            order_id: Uuid,
            status: OrderStatus,
            note: Option<FlowExtension>,
        ) -> Result<bool, RelayError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RelayError::ActorUnavailable(order_id));
            }
            self.advances
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((order_id, status, note));
            Ok(true)
        }
    }
}
