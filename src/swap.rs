//! Swap sub-flow seam
//!
//! A failed swap is an ordinary outcome: the deposit processor falls back to a
//! plain transfer of the source asset.

use async_trait::async_trait;

use crate::order::{Order, OrderExtension, OrderStatus, SwapStage, TransferInfo};

/// Order fields a successful swap hands back
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFragment {
    pub status: OrderStatus,
    pub to_transfer: TransferInfo,
    pub extension: OrderExtension,
    pub from_raw_transaction: Option<String>,
}

impl SwapFragment {
    pub fn apply_to(self, order: &mut Order) {
        order.status = self.status;
        order.to_transfer = self.to_transfer;
        order.extension = self.extension;
        order.from_raw_transaction = self.from_raw_transaction;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    Swapped(SwapFragment),
    Failed { stage: SwapStage, reason: String },
}

#[async_trait]
pub trait SwapFlow: Send + Sync {
    async fn swap(&self, order: &Order) -> SwapOutcome;
}

/// Deployments without a swap router: every swap request falls back
pub struct DisabledSwap;

#[async_trait]
impl SwapFlow for DisabledSwap {
    async fn swap(&self, _order: &Order) -> SwapOutcome {
        SwapOutcome::Failed {
            stage: SwapStage::Fallback,
            reason: "swap router not configured".to_string(),
        }
    }
}

#[cfg(any(test, feature = "mock-api"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed outcome; `None` echoes the order back as swapped to `ToTransferring`
    pub struct MockSwap {
        outcome: Mutex<Option<SwapOutcome>>,
        calls: AtomicUsize,
    }

    impl MockSwap {
        pub fn new(outcome: Option<SwapOutcome>) -> Self {
            Self {
                outcome: Mutex::new(outcome),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self::new(Some(SwapOutcome::Failed {
                stage: SwapStage::Fallback,
                reason: reason.to_string(),
            }))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SwapFlow for MockSwap {
        async fn swap(&self, order: &Order) -> SwapOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let configured = self
                .outcome
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            configured.unwrap_or_else(|| {
                let mut extension = order.extension.clone();
                extension.swap_stage = Some(SwapStage::Swapping);
                SwapOutcome::Swapped(SwapFragment {
                    status: OrderStatus::ToTransferring,
                    to_transfer: order.to_transfer.clone(),
                    extension,
                    from_raw_transaction: order.from_raw_transaction.clone(),
                })
            })
        }
    }
}
