//! Integration Tests for the Deposit Relay
//!
//! Real actors, processor and timer loops wired to in-memory stores and mock
//! chain/swap collaborators. Timer loops are swept by hand so every step is
//! deterministic.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::chain::{
    ChainError, ChainFamily, MockChainProvider, ProviderRegistry, RELEASE_METHOD, TxConfirmation,
    TxResultStatus,
};
use crate::config::{ChainConfig, RelayConfig, TimerConfig};
use crate::custody::poller_channel;
use crate::notify::mock::RecordingAlarmSink;
use crate::notify::{Alarms, Auditor, LogAuditSink, templates};
use crate::order::types::fixtures::deposit_order;
use crate::order::{
    Order, OrderStatus, StatusFlowRecorder, SwapStage, TransferStatus, count_status,
};
use crate::relay::{ActorRegistry, DepositProcessor, OrderDriver, ProcessorDeps, TimerHandles};
use crate::store::{InMemoryFlowStore, InMemoryOrderStore, MAX_FLOW_ENTRIES, OrderStore};
use crate::swap::mock::MockSwap;
use crate::swap::{SwapFlow, SwapFragment, SwapOutcome};
use crate::timer::{
    ConfirmationTimer, RetryCoordinator, RetryLoop, WatchClass, Watchdog, timer_channel,
};

struct TestHarness {
    registry: Arc<ActorRegistry>,
    store: Arc<InMemoryOrderStore>,
    flow: StatusFlowRecorder,
    provider: Arc<MockChainProvider>,
    alarms: Arc<RecordingAlarmSink>,
    normal: ConfirmationTimer,
    fast: ConfirmationTimer,
    retry: RetryLoop,
    watchdog: Watchdog,
}

fn relay_config() -> RelayConfig {
    RelayConfig {
        send_max_wait_ms: 50,
        send_poll_delay_ms: 10,
        max_transfer_retries: 5,
        alarm_timeout_ms: 200,
        ..Default::default()
    }
}

impl TestHarness {
    fn new(swap: Arc<dyn SwapFlow>, config: RelayConfig) -> Self {
        let store = Arc::new(InMemoryOrderStore::new());
        let flow = StatusFlowRecorder::new(Arc::new(InMemoryFlowStore::new()));
        let provider = Arc::new(MockChainProvider::new("aelf"));
        let alarms = Arc::new(RecordingAlarmSink::new());

        let mut chains = ProviderRegistry::new();
        chains.register_provider(ChainFamily::Native, provider.clone());
        chains.register_chain(ChainConfig {
            chain_id: "tDVV".to_string(),
            network: "AELF".to_string(),
            family: ChainFamily::Native,
            release_account: "ELF_release_tDVV".to_string(),
            release_contract: "TokenPool".to_string(),
            required_confirmations: 1,
            assets: [("USDT".to_string(), 6), ("ELF".to_string(), 8)].into(),
        });
        let chains = Arc::new(chains);

        let (normal_handle, normal_rx) = timer_channel(WatchClass::Normal);
        let (fast_handle, fast_rx) = timer_channel(WatchClass::Fast);
        let (retry, retry_rx) = RetryCoordinator::new(flow.clone(), Duration::ZERO);
        let (watchdog_handle, watchdog_rx) = Watchdog::channel(Duration::ZERO);
        let (custody_handle, _custody_rx) = poller_channel();
        let alarm_front = Alarms::new(alarms.clone(), Duration::from_millis(200));

        let processor = Arc::new(DepositProcessor::new(
            ProcessorDeps {
                store: store.clone(),
                flow: flow.clone(),
                chains: chains.clone(),
                swap,
                alarms: alarm_front.clone(),
                audit: Auditor::new(Arc::new(LogAuditSink)),
                timers: TimerHandles {
                    normal: normal_handle,
                    fast: fast_handle,
                },
                retry,
                watchdog: watchdog_handle,
                custody: custody_handle,
            },
            config,
        ));
        let registry = Arc::new(ActorRegistry::new(processor));

        let timing = TimerConfig::new(0, 10);
        Self {
            normal: ConfirmationTimer::new(
                WatchClass::Normal,
                normal_rx,
                chains.clone(),
                registry.clone(),
                timing,
                3,
            ),
            fast: ConfirmationTimer::new(WatchClass::Fast, fast_rx, chains, registry.clone(), timing, 3),
            retry: RetryLoop::new(retry_rx, registry.clone(), timing),
            watchdog: Watchdog::new(watchdog_rx, store.clone(), alarm_front, timing),
            registry,
            store,
            flow,
            provider,
            alarms,
        }
    }

    fn plain() -> Self {
        Self::new(Arc::new(MockSwap::new(None)), relay_config())
    }

    async fn submit(&self, order: &Order) {
        assert!(self.store.insert_if_absent(order).await.unwrap());
        self.registry.drive(order.id).await.unwrap();
    }

    async fn order(&self, order_id: Uuid) -> Order {
        self.store.get(order_id).await.unwrap().unwrap()
    }

    /// Poll the store until `pred` holds for the order
    async fn wait_until(&self, order_id: Uuid, pred: impl Fn(&Order) -> bool) -> Order {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let order = self.order(order_id).await;
            if pred(&order) {
                return order;
            }
            assert!(Instant::now() < deadline, "order stuck at {}", order.status);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn flow_statuses(&self, order_id: Uuid) -> Vec<OrderStatus> {
        self.flow
            .read(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect()
    }
}

fn forwarded(order: &Order) -> bool {
    order.status.is_awaiting_confirmation() && order.extension.is_forward == Some(true)
}

// ========================================================================
// Happy Path
// ========================================================================

/// Flow: FromTransferConfirmed → ToStartTransfer → ToTransferring → ToTransferred → ToTransferConfirmed → Finish
#[tokio::test]
async fn test_deposit_happy_path() {
    let mut h = TestHarness::plain();
    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(waiting.status, OrderStatus::ToTransferred);
    assert!(waiting.from_raw_transaction.is_some());

    let created = h.provider.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].method, RELEASE_METHOD);
    assert_eq!(created[0].from, "ELF_release_tDVV");
    assert_eq!(created[0].contract, "aelf_tDVV_TokenPool");
    assert_eq!(created[0].params["amount"], "10000000");
    assert_eq!(created[0].params["symbol"], "USDT");
    assert_eq!(created[0].params["to"], "ELF_receiver_tDVV");
    assert_eq!(created[0].params["memo"], order.memo());

    // The signed bytes persisted before sending are what went out
    assert_eq!(h.provider.sent(), vec![waiting.from_raw_transaction.clone().unwrap()]);

    h.normal.drain_commands();
    assert!(h.normal.contains(&order.id));
    assert_eq!(h.normal.sweep().await, 1);

    let done = h.wait_until(order.id, |o| o.status == OrderStatus::Finish).await;
    assert!(done.arrival_time.is_some());
    assert_eq!(
        h.flow_statuses(order.id).await,
        vec![
            OrderStatus::ToStartTransfer,
            OrderStatus::ToTransferring,
            OrderStatus::ToTransferred,
            OrderStatus::ToTransferConfirmed,
            OrderStatus::Finish,
        ]
    );

    h.normal.drain_commands();
    assert!(h.normal.is_empty());
}

/// A result still pending after the send wait goes to the timer as ToTransferring
#[tokio::test]
async fn test_slow_release_waits_for_timer() {
    let mut h = TestHarness::plain();
    h.provider.set_poll_hangs(true);

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(waiting.status, OrderStatus::ToTransferring);

    h.normal.drain_commands();
    assert_eq!(h.normal.sweep().await, 1);
    h.wait_until(order.id, |o| o.status == OrderStatus::Finish)
        .await;
}

/// Transport failure on send: outcome unknown, so the timer settles it
#[tokio::test]
async fn test_send_transport_error_is_not_a_failure() {
    let mut h = TestHarness::plain();
    h.provider
        .set_send_error(Some(ChainError::Transport("connection reset".to_string())));

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(waiting.status, OrderStatus::ToTransferring);
    assert!(waiting.to_transfer.tx_id.is_some());

    h.normal.drain_commands();
    assert!(h.normal.contains(&order.id));
}

// ========================================================================
// Resume
// ========================================================================

/// A stored signed transaction is replayed verbatim, never rebuilt
#[tokio::test]
async fn test_resume_replays_stored_transaction() {
    let h = TestHarness::plain();
    let mut order = deposit_order("USDT", "USDT");
    order.status = OrderStatus::ToStartTransfer;
    order.to_transfer.tx_id = Some("stored-tx".to_string());
    order.from_raw_transaction = Some("deadbeef".to_string());
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(waiting.to_transfer.tx_id.as_deref(), Some("stored-tx"));
    assert_eq!(h.provider.create_count(), 0);
    assert_eq!(h.provider.sign_count(), 0);
    assert_eq!(h.provider.sent(), vec!["deadbeef".to_string()]);
}

/// Send outcome unknown and the tx never shows up: the retry resends the same bytes
#[tokio::test]
async fn test_lost_transaction_retry_replays_same_bytes() {
    let mut h = TestHarness::plain();
    h.provider
        .set_send_error(Some(ChainError::Transport("connection reset".to_string())));

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let first = h.wait_until(order.id, forwarded).await;
    assert_eq!(first.status, OrderStatus::ToTransferring);
    let tx_id = first.to_transfer.tx_id.clone().unwrap();
    let raw = first.from_raw_transaction.clone().unwrap();

    // Three not-found polls escalate to a failure
    h.provider.set_confirmation(&tx_id, TxConfirmation::NotFound);
    h.normal.drain_commands();
    assert_eq!(h.normal.sweep().await, 0);
    assert_eq!(h.normal.sweep().await, 0);
    assert_eq!(h.normal.sweep().await, 1);

    let failed = h
        .wait_until(order.id, |o| o.status == OrderStatus::ToTransferFailed)
        .await;
    assert_eq!(failed.from_raw_transaction.as_deref(), Some(raw.as_str()));
    assert_eq!(failed.to_transfer.tx_id.as_deref(), Some(tx_id.as_str()));

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.retry.is_empty() {
        assert!(Instant::now() < deadline, "no retry scheduled");
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.retry.drain_commands();
    }

    h.provider.set_send_error(None);
    assert_eq!(h.retry.sweep(Instant::now()).await, 1);

    let resent = h.wait_until(order.id, forwarded).await;
    assert_eq!(resent.status, OrderStatus::ToTransferred);
    assert_eq!(resent.to_transfer.tx_id.as_deref(), Some(tx_id.as_str()));
    assert_eq!(h.provider.create_count(), 1);
    assert_eq!(h.provider.sign_count(), 1);
    assert_eq!(h.provider.send_count(), 2);
    assert_eq!(h.provider.sent(), vec![raw]);
    assert_eq!(
        h.flow_statuses(order.id).await,
        vec![
            OrderStatus::ToStartTransfer,
            OrderStatus::ToTransferring,
            OrderStatus::ToTransferFailed,
            OrderStatus::ToStartTransfer,
            OrderStatus::ToTransferring,
            OrderStatus::ToTransferred,
        ]
    );
}

/// A replay the node refuses is not proof the first submission failed
#[tokio::test]
async fn test_rejected_replay_keeps_stored_transaction() {
    let mut h = TestHarness::plain();
    h.provider
        .set_send_error(Some(ChainError::Rejected("duplicate transaction".to_string())));

    let mut order = deposit_order("USDT", "USDT");
    order.status = OrderStatus::ToStartTransfer;
    order.to_transfer.tx_id = Some("stored-tx".to_string());
    order.from_raw_transaction = Some("deadbeef".to_string());
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(waiting.status, OrderStatus::ToTransferring);
    assert_eq!(waiting.from_raw_transaction.as_deref(), Some("deadbeef"));
    assert_eq!(h.provider.create_count(), 0);

    h.normal.drain_commands();
    assert!(h.normal.contains(&order.id));
}

#[tokio::test]
async fn test_recovery_rewatches_and_redrives() {
    let mut h = TestHarness::plain();

    let mut watched = deposit_order("USDT", "USDT");
    watched.third_party_order_id = "cobo-a".to_string();
    watched.status = OrderStatus::ToTransferred;
    watched.to_transfer.tx_id = Some("tx-a".to_string());
    watched.extension.is_forward = Some(true);

    let mut restarted = deposit_order("USDT", "USDT");
    restarted.third_party_order_id = "cobo-b".to_string();
    restarted.status = OrderStatus::ToStartTransfer;

    let mut source = deposit_order("USDT", "USDT");
    source.third_party_order_id = "cobo-c".to_string();
    source.status = OrderStatus::Pending;

    let mut finished = deposit_order("USDT", "USDT");
    finished.third_party_order_id = "cobo-d".to_string();
    finished.status = OrderStatus::Finish;

    for order in [&watched, &restarted, &source, &finished] {
        assert!(h.store.insert_if_absent(order).await.unwrap());
    }

    let report = h.registry.recover().await.unwrap();
    assert_eq!(report.rewatched, 1);
    assert_eq!(report.redriven, 1);
    assert_eq!(report.skipped, 1);

    h.wait_until(restarted.id, forwarded).await;
    h.normal.drain_commands();
    assert!(h.normal.contains(&watched.id));
    assert!(h.normal.contains(&restarted.id));
    assert_eq!(h.order(source.id).await.status, OrderStatus::Pending);
}

// ========================================================================
// Failure Handling
// ========================================================================

/// Every attempt rejected: five ToStartTransfer visits, then Failed
#[tokio::test]
async fn test_retry_budget_ends_in_failed() {
    let mut h = TestHarness::plain();
    h.provider
        .set_send_error(Some(ChainError::Rejected("insufficient balance".to_string())));

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    for _ in 0..10 {
        // Wait for the next retry to be scheduled or the order to give up
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            h.retry.drain_commands();
            if !h.retry.is_empty() || h.order(order.id).await.status == OrderStatus::Failed {
                break;
            }
            assert!(Instant::now() < deadline, "no retry scheduled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if h.retry.is_empty() {
            break;
        }
        assert_eq!(h.retry.sweep(Instant::now()).await, 1);
    }

    let failed = h.wait_until(order.id, |o| o.status == OrderStatus::Failed).await;
    let flow = h.flow.read(order.id).await.unwrap();
    assert_eq!(count_status(&flow, OrderStatus::ToStartTransfer), 5);
    assert_eq!(count_status(&flow, OrderStatus::ToTransferFailed), 5);
    assert_eq!(flow.last().unwrap().status, OrderStatus::Failed);

    // Each attempt signed afresh after the previous one was cleared
    assert_eq!(h.provider.create_count(), 5);
    assert_eq!(h.provider.send_count(), 5);
    assert_eq!(failed.to_transfer.status, TransferStatus::Failed);
}

#[tokio::test]
async fn test_node_validation_failure_schedules_retry() {
    let mut h = TestHarness::plain();
    h.provider
        .set_poll_status(TxResultStatus::NodeValidationFailed);

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let failed = h
        .wait_until(order.id, |o| {
            o.status == OrderStatus::ToTransferFailed && o.from_raw_transaction.is_none()
        })
        .await;
    assert!(failed.to_transfer.tx_id.is_none());

    let flow = h.flow.read(order.id).await.unwrap();
    let entry = flow.last().unwrap();
    assert_eq!(entry.status, OrderStatus::ToTransferFailed);
    assert!(entry.extension.as_ref().unwrap().contains_key("Error"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.retry.is_empty() {
        assert!(Instant::now() < deadline, "no retry scheduled");
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.retry.drain_commands();
    }
}

/// A full flow does not block the order: the status write stands
#[tokio::test]
async fn test_full_flow_keeps_order_moving() {
    let h = TestHarness::plain();
    let mut order = deposit_order("USDT", "USDT");
    order.status = OrderStatus::ToTransferConfirmed;
    order.to_transfer.tx_id = Some("tx-full".to_string());
    assert!(h.store.insert_if_absent(&order).await.unwrap());

    for _ in 0..MAX_FLOW_ENTRIES {
        h.flow
            .append(order.id, OrderStatus::ToTransferring, None)
            .await
            .unwrap();
    }

    h.registry.drive(order.id).await.unwrap();
    let done = h.wait_until(order.id, |o| o.status == OrderStatus::Finish).await;
    assert_eq!(done.to_transfer.status, TransferStatus::Confirmed);

    let flow = h.flow_statuses(order.id).await;
    assert_eq!(flow.len(), MAX_FLOW_ENTRIES);
    assert!(flow.iter().all(|s| *s == OrderStatus::ToTransferring));
}

/// A late confirmation for a finished order is dropped
#[tokio::test]
async fn test_stale_confirmation_rejected() {
    let h = TestHarness::plain();
    let mut order = deposit_order("USDT", "USDT");
    order.status = OrderStatus::Finish;
    assert!(h.store.insert_if_absent(&order).await.unwrap());

    let accepted = h
        .registry
        .advance(order.id, OrderStatus::ToTransferConfirmed, None)
        .await
        .unwrap();
    assert!(!accepted);
    assert_eq!(h.order(order.id).await.status, OrderStatus::Finish);
    assert!(h.flow_statuses(order.id).await.is_empty());
}

#[tokio::test]
async fn test_drive_step_guard_raises_alarm() {
    let config = RelayConfig {
        max_drive_steps: 1,
        ..relay_config()
    };
    let h = TestHarness::new(Arc::new(MockSwap::new(None)), config);

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.alarms.count(templates::STUCK_ORDER) == 0 {
        assert!(Instant::now() < deadline, "stuck alarm never raised");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.order(order.id).await.status, OrderStatus::ToStartTransfer);
    assert_eq!(h.provider.create_count(), 0);
}

#[tokio::test]
async fn test_watchdog_alarms_unfinished_order() {
    let mut h = TestHarness::plain();
    h.provider.set_poll_hangs(true);

    let order = deposit_order("USDT", "USDT");
    h.submit(&order).await;
    h.wait_until(order.id, forwarded).await;

    h.watchdog.drain_commands();
    assert_eq!(h.watchdog.sweep(Instant::now()).await, 1);
    assert_eq!(h.alarms.count(templates::ORDER_NOT_FINISHED), 1);
}

// ========================================================================
// Swap
// ========================================================================

/// Swap fails: the order becomes a plain transfer of the source asset
#[tokio::test]
async fn test_swap_failure_falls_back_to_transfer() {
    let swap = Arc::new(MockSwap::failing("no route"));
    let h = TestHarness::new(swap.clone(), relay_config());

    let order = deposit_order("USDT", "ELF");
    assert!(order.extension.need_swap);
    h.submit(&order).await;

    let waiting = h.wait_until(order.id, forwarded).await;
    assert_eq!(swap.calls(), 1);
    assert!(!waiting.extension.need_swap);
    assert_eq!(waiting.extension.swap_stage, Some(SwapStage::Fallback));
    assert_eq!(waiting.to_transfer.symbol, "USDT");
    assert_eq!(h.provider.created()[0].params["symbol"], "USDT");
    assert_eq!(h.alarms.count(templates::SWAP_FALLBACK), 1);
}

/// A swap delivered to the main chain is confirmed by the fast timer
#[tokio::test]
async fn test_swap_to_main_uses_fast_timer() {
    let order = deposit_order("USDT", "ELF");
    let mut to_transfer = order.to_transfer.clone();
    to_transfer.tx_id = Some("swap-tx".to_string());
    let mut extension = order.extension.clone();
    extension.swap_stage = Some(SwapStage::SwappedToMain);

    let swap = Arc::new(MockSwap::new(Some(SwapOutcome::Swapped(SwapFragment {
        status: OrderStatus::ToTransferring,
        to_transfer,
        extension,
        from_raw_transaction: Some("swap-raw".to_string()),
    }))));
    let mut h = TestHarness::new(swap, relay_config());
    h.submit(&order).await;

    h.wait_until(order.id, forwarded).await;
    assert_eq!(h.provider.create_count(), 0);

    h.fast.drain_commands();
    h.normal.drain_commands();
    assert!(h.fast.contains(&order.id));
    assert!(h.normal.is_empty());

    assert_eq!(h.fast.sweep().await, 1);
    h.wait_until(order.id, |o| o.status == OrderStatus::Finish)
        .await;
}
