//! Retry Coordinator
//!
//! Attempt counts are never stored: `should_retry` counts prior visits of the
//! target status in the order's own status flow. Scheduled retries sit in a
//! map owned by a single loop that re-drives the order once its delay passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TimerConfig;
use crate::order::{OrderStatus, StatusFlowRecorder};
use crate::relay::OrderDriver;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub order_id: Uuid,
    /// Status the order is re-driven with
    pub target: OrderStatus,
    pub due: Instant,
}

#[derive(Clone)]
pub struct RetryCoordinator {
    flow: StatusFlowRecorder,
    tx: mpsc::UnboundedSender<RetryRecord>,
    delay: Duration,
}

impl RetryCoordinator {
    pub fn new(
        flow: StatusFlowRecorder,
        delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RetryRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { flow, tx, delay }, rx)
    }

    /// True while `target` appears fewer than `max_attempts` times in the flow
    pub async fn should_retry(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        max_attempts: usize,
    ) -> Result<bool, StoreError> {
        let attempts = self.flow.count(order_id, target).await?;
        debug!(
            order_id = %order_id,
            target = %target,
            attempts = attempts,
            max_attempts = max_attempts,
            "Retry budget check"
        );
        Ok(attempts < max_attempts)
    }

    pub fn schedule_retry(&self, order_id: Uuid, target: OrderStatus) {
        let record = RetryRecord {
            order_id,
            target,
            due: Instant::now() + self.delay,
        };
        if self.tx.send(record).is_err() {
            warn!(order_id = %order_id, "Retry loop stopped, retry dropped");
        }
    }
}

pub struct RetryLoop {
    rx: mpsc::UnboundedReceiver<RetryRecord>,
    pending: HashMap<Uuid, RetryRecord>,
    driver: Arc<dyn OrderDriver>,
    timing: TimerConfig,
}

impl RetryLoop {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RetryRecord>,
        driver: Arc<dyn OrderDriver>,
        timing: TimerConfig,
    ) -> Self {
        Self {
            rx,
            pending: HashMap::new(),
            driver,
            timing,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn run(mut self) {
        info!(
            initial_delay_ms = self.timing.initial_delay_ms,
            period_ms = self.timing.period_ms,
            "Starting retry loop"
        );

        let start = Instant::now() + self.timing.initial_delay();
        let mut ticker = tokio::time::interval_at(start, self.timing.period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = self.rx.recv() => match record {
                    Some(record) => self.enqueue(record),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.drain_commands();
                    self.sweep(Instant::now()).await;
                }
            }
        }
    }

    fn enqueue(&mut self, record: RetryRecord) {
        debug!(order_id = %record.order_id, target = %record.target, "Retry scheduled");
        self.pending.insert(record.order_id, record);
    }

    pub fn drain_commands(&mut self) {
        while let Ok(record) = self.rx.try_recv() {
            self.enqueue(record);
        }
    }

    /// Re-drive every retry due at `now`; returns how many fired
    pub async fn sweep(&mut self, now: Instant) -> usize {
        let due: Vec<RetryRecord> = self
            .pending
            .values()
            .filter(|r| r.due <= now)
            .cloned()
            .collect();

        let mut fired = 0;
        for record in due {
            match self
                .driver
                .advance(record.order_id, record.target, None)
                .await
            {
                Ok(accepted) => {
                    if accepted {
                        info!(order_id = %record.order_id, target = %record.target, "Retry fired");
                    }
                    self.pending.remove(&record.order_id);
                    fired += 1;
                }
                Err(e) => {
                    warn!(order_id = %record.order_id, error = %e, "Retry re-drive failed, keeping record");
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::RecordingDriver;
    use crate::store::InMemoryFlowStore;

    fn coordinator(delay: Duration) -> (RetryCoordinator, mpsc::UnboundedReceiver<RetryRecord>, StatusFlowRecorder) {
        let flow = StatusFlowRecorder::new(Arc::new(InMemoryFlowStore::new()));
        let (coordinator, rx) = RetryCoordinator::new(flow.clone(), delay);
        (coordinator, rx, flow)
    }

    #[tokio::test]
    async fn test_should_retry_counts_flow_entries() {
        let (coordinator, _rx, flow) = coordinator(Duration::ZERO);
        let order_id = Uuid::new_v4();

        for _ in 0..4 {
            flow.append(order_id, OrderStatus::ToStartTransfer, None)
                .await
                .unwrap();
            flow.append(order_id, OrderStatus::ToTransferFailed, None)
                .await
                .unwrap();
        }
        assert!(coordinator
            .should_retry(order_id, OrderStatus::ToStartTransfer, 5)
            .await
            .unwrap());

        flow.append(order_id, OrderStatus::ToStartTransfer, None)
            .await
            .unwrap();
        assert!(!coordinator
            .should_retry(order_id, OrderStatus::ToStartTransfer, 5)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_retry_fires_after_delay() {
        let (coordinator, rx, _flow) = coordinator(Duration::from_secs(30));
        let driver = Arc::new(RecordingDriver::new());
        let mut retry_loop = RetryLoop::new(rx, driver.clone(), TimerConfig::new(0, 10));

        let order_id = Uuid::new_v4();
        coordinator.schedule_retry(order_id, OrderStatus::ToStartTransfer);
        retry_loop.drain_commands();

        assert_eq!(retry_loop.sweep(Instant::now()).await, 0);
        assert_eq!(retry_loop.len(), 1);

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(retry_loop.sweep(later).await, 1);
        assert!(retry_loop.is_empty());
        assert_eq!(
            driver.advances(),
            vec![(order_id, OrderStatus::ToStartTransfer, None)]
        );
    }

    #[tokio::test]
    async fn test_failed_redrive_keeps_record() {
        let (coordinator, rx, _flow) = coordinator(Duration::ZERO);
        let driver = Arc::new(RecordingDriver::new());
        let mut retry_loop = RetryLoop::new(rx, driver.clone(), TimerConfig::new(0, 10));

        coordinator.schedule_retry(Uuid::new_v4(), OrderStatus::ToStartTransfer);
        retry_loop.drain_commands();

        driver.set_fail(true);
        assert_eq!(retry_loop.sweep(Instant::now()).await, 0);
        assert_eq!(retry_loop.len(), 1);
    }
}
