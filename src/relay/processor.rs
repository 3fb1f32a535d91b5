//! Deposit dispatch table
//!
//! One call to [`DepositProcessor::process`] handles the order's current status
//! once: it performs the action for that status, persists the outcome and tells
//! the actor whether to continue, wait or stop.
//!
//! Persist-before-send: the signed release transaction is written to the order
//! before it is submitted, and a stored transaction is always replayed instead
//! of signing a new one.

use rust_decimal::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::RelayError;
use crate::chain::{ChainError, ChainTransaction, ProviderRegistry, RELEASE_METHOD, TxResultStatus};
use crate::config::RelayConfig;
use crate::custody::CustodyPollerHandle;
use crate::logging::FLOW_TARGET;
use crate::notify::{Alarms, Auditor, params, templates};
use crate::order::{
    FLOW_KEY_ERROR, FlowExtension, Order, OrderStatus, StatusFlowRecorder, SwapStage,
    TransferStatus, now_millis,
};
use crate::store::OrderStore;
use crate::swap::{SwapFlow, SwapOutcome};
use crate::timer::{PendingWatch, RetryCoordinator, TimerHandle, WatchdogHandle};

/// What the actor does after one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Status changed and was persisted; process the new status
    Continue,
    /// Handed off to a timer; wait for it to report back
    Wait,
    /// Terminal status reached
    Terminal,
    /// Status this processor doesn't own
    Ignored,
}

/// Whether a status injected by a timer may replace `current`
///
/// Guards against stale or duplicated reports: confirmation results only land on
/// an order awaiting confirmation, retries only on a failed order.
pub fn accepts_injected(current: OrderStatus, injected: OrderStatus) -> bool {
    match injected {
        OrderStatus::ToTransferConfirmed | OrderStatus::ToTransferFailed => {
            current.is_awaiting_confirmation()
        }
        OrderStatus::ToStartTransfer => current == OrderStatus::ToTransferFailed,
        _ => false,
    }
}

/// Integer chain amount: `round(amount * 10^decimals)`
pub fn to_chain_amount(amount: Decimal, decimals: u32) -> Result<Decimal, RelayError> {
    let scale = 10u64
        .checked_pow(decimals)
        .ok_or_else(|| RelayError::InvalidAmount(format!("decimals {} out of range", decimals)))?;
    let scaled = amount
        .checked_mul(Decimal::from(scale))
        .ok_or_else(|| RelayError::InvalidAmount(format!("{} overflows at {} decimals", amount, decimals)))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    if scaled <= Decimal::ZERO {
        return Err(RelayError::InvalidAmount(format!(
            "{} is not a positive amount",
            amount
        )));
    }
    Ok(scaled.normalize())
}

fn error_note(reason: impl Into<String>) -> FlowExtension {
    FlowExtension::from([(FLOW_KEY_ERROR.to_string(), reason.into())])
}

/// Confirmation timers by class
#[derive(Clone)]
pub struct TimerHandles {
    pub normal: TimerHandle,
    pub fast: TimerHandle,
}

impl TimerHandles {
    pub fn for_order(&self, order: &Order) -> &TimerHandle {
        if order.extension.swap_stage == Some(SwapStage::SwappedToMain) {
            &self.fast
        } else {
            &self.normal
        }
    }
}

/// Collaborators of the processor
pub struct ProcessorDeps {
    pub store: Arc<dyn OrderStore>,
    pub flow: StatusFlowRecorder,
    pub chains: Arc<ProviderRegistry>,
    pub swap: Arc<dyn SwapFlow>,
    pub alarms: Alarms,
    pub audit: Auditor,
    pub timers: TimerHandles,
    pub retry: RetryCoordinator,
    pub watchdog: WatchdogHandle,
    pub custody: CustodyPollerHandle,
}

pub struct DepositProcessor {
    store: Arc<dyn OrderStore>,
    flow: StatusFlowRecorder,
    chains: Arc<ProviderRegistry>,
    swap: Arc<dyn SwapFlow>,
    alarms: Alarms,
    audit: Auditor,
    timers: TimerHandles,
    retry: RetryCoordinator,
    watchdog: WatchdogHandle,
    custody: CustodyPollerHandle,
    config: RelayConfig,
}

impl DepositProcessor {
    pub fn new(deps: ProcessorDeps, config: RelayConfig) -> Self {
        Self {
            store: deps.store,
            flow: deps.flow,
            chains: deps.chains,
            swap: deps.swap,
            alarms: deps.alarms,
            audit: deps.audit,
            timers: deps.timers,
            retry: deps.retry,
            watchdog: deps.watchdog,
            custody: deps.custody,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn alarms(&self) -> &Alarms {
        &self.alarms
    }

    /// Handle the order's current status once
    pub async fn process(&self, order: &mut Order) -> Result<Step, RelayError> {
        debug!(target: FLOW_TARGET, order_id = %order.id, status = %order.status, "process");

        match order.status {
            OrderStatus::FromTransferConfirmed => {
                self.watchdog.register(order.id);
                self.transition(order, OrderStatus::ToStartTransfer, None)
                    .await?;
                Ok(Step::Continue)
            }
            OrderStatus::ToStartTransfer => self.start_transfer(order).await,
            OrderStatus::ToTransferring | OrderStatus::ToTransferred => {
                self.hand_to_timer(order).await
            }
            OrderStatus::ToTransferConfirmed => {
                order.to_transfer.status = TransferStatus::Confirmed;
                order.arrival_time = Some(now_millis());
                self.transition(order, OrderStatus::Finish, None).await?;
                Ok(Step::Continue)
            }
            OrderStatus::ToTransferFailed => self.transfer_failed(order).await,
            OrderStatus::Finish | OrderStatus::Expired | OrderStatus::Failed => {
                self.release_registrations(order);
                Ok(Step::Terminal)
            }
            status => {
                error!(
                    order_id = %order.id,
                    status = %status,
                    "Deposit actor received a status it does not own"
                );
                Ok(Step::Ignored)
            }
        }
    }

    /// Set a status injected from outside, persisting it with `note`
    pub async fn inject(
        &self,
        order: &mut Order,
        status: OrderStatus,
        note: Option<FlowExtension>,
    ) -> Result<bool, RelayError> {
        if !accepts_injected(order.status, status) {
            warn!(
                order_id = %order.id,
                current = %order.status,
                injected = %status,
                "Injected status rejected"
            );
            return Ok(false);
        }
        self.transition(order, status, note).await?;
        Ok(true)
    }

    /// Put an order back under confirmation polling after a restart
    pub fn rewatch(&self, order: &Order) -> bool {
        match order.to_transfer.tx_id.as_deref() {
            Some(tx_id) => {
                self.timers.for_order(order).watch(PendingWatch::destination(
                    order.id,
                    &order.to_transfer.chain_id,
                    tx_id,
                    order.to_transfer.tx_time.unwrap_or(order.last_modify_time),
                ));
                true
            }
            None => false,
        }
    }

    /// Persist a status change and record it in the flow
    async fn transition(
        &self,
        order: &mut Order,
        status: OrderStatus,
        note: Option<FlowExtension>,
    ) -> Result<(), RelayError> {
        let from = order.status;
        order.status = status;
        order.touch();
        self.store.update(order).await?;

        match self.flow.append(order.id, status, note).await {
            Ok(flow) => self.audit.flow(order.id, flow),
            // The order write stands; only the audit trail misses the entry
            Err(e) => warn!(order_id = %order.id, status = %status, error = %e, "Status flow append failed"),
        }
        self.audit.order(order.clone());

        info!(order_id = %order.id, from = %from, to = %status, "Order status changed");
        Ok(())
    }

    /// Persist without a flow entry
    async fn save(&self, order: &mut Order) -> Result<(), RelayError> {
        order.touch();
        self.store.update(order).await?;
        self.audit.order(order.clone());
        Ok(())
    }

    async fn start_transfer(&self, order: &mut Order) -> Result<Step, RelayError> {
        if order.extension.need_swap {
            match self.swap.swap(order).await {
                SwapOutcome::Swapped(fragment) => {
                    let status = fragment.status;
                    fragment.apply_to(order);
                    order.status = OrderStatus::ToStartTransfer;
                    info!(order_id = %order.id, next = %status, "Swap accepted");
                    self.transition(order, status, None).await?;
                    return Ok(Step::Continue);
                }
                SwapOutcome::Failed { stage, reason } => {
                    warn!(order_id = %order.id, stage = %stage, reason = %reason, "Swap failed, falling back to transfer");
                    self.alarms
                        .raise(
                            templates::SWAP_FALLBACK,
                            params([
                                ("order_id", order.id.to_string()),
                                ("from_symbol", order.from_transfer.symbol.clone()),
                                ("to_symbol", order.to_transfer.symbol.clone()),
                                ("reason", reason),
                            ]),
                        )
                        .await;
                    order.fall_back_to_transfer(stage);
                    self.save(order).await?;
                }
            }
        }

        if let Some((next, note)) = self.release(order).await? {
            if next == OrderStatus::ToTransferFailed {
                order.to_transfer.status = TransferStatus::Failed;
            }
            self.transition(order, next, note).await?;
        }
        Ok(Step::Continue)
    }

    /// Build, persist, send and briefly await the release transaction
    ///
    /// A successful or unknown send is recorded as `ToTransferring` before the
    /// wait. Returns the status that follows, or `None` to stay at
    /// `ToTransferring` and leave the outcome to the confirmation timer.
    ///
    /// Stored bytes are dropped only when the chain has definitively refused
    /// them; anything short of that keeps them for a replay.
    async fn release(
        &self,
        order: &mut Order,
    ) -> Result<Option<(OrderStatus, Option<FlowExtension>)>, RelayError> {
        order.extension.is_forward = Some(false);
        let chain_id = order.to_transfer.chain_id.clone();
        let provider = match self.chains.provider(&chain_id) {
            Ok(p) => p,
            Err(e) => {
                return Ok(Some((OrderStatus::ToTransferFailed, Some(error_note(e.to_string())))));
            }
        };

        let stored = match (&order.from_raw_transaction, &order.to_transfer.tx_id) {
            (Some(raw), Some(tx_id)) => Some((tx_id.clone(), raw.clone())),
            _ => None,
        };
        let replay = stored.is_some();

        let (tx_id, raw) = match stored {
            Some((tx_id, raw)) => {
                info!(order_id = %order.id, tx_id = %tx_id, "Replaying stored release transaction");
                (tx_id, raw)
            }
            None => match self.build_release(order).await {
                Ok(signed) => {
                    order.to_transfer.tx_id = Some(signed.tx_id.clone());
                    order.to_transfer.tx_time = Some(now_millis());
                    order.to_transfer.status = TransferStatus::StartTransfer;
                    order.from_raw_transaction = Some(signed.raw_hex.clone());
                    self.save(order).await?;
                    (signed.tx_id, signed.raw_hex)
                }
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "Failed to build release transaction");
                    return Ok(Some((OrderStatus::ToTransferFailed, Some(error_note(e.to_string())))));
                }
            },
        };

        let sent = match provider.send_transaction(&chain_id, &raw).await {
            Ok(()) => true,
            // A replay may be refused because the first submission is already known
            Err(ChainError::Rejected(reason)) if !replay => {
                warn!(order_id = %order.id, tx_id = %tx_id, reason = %reason, "Release transaction rejected");
                order.clear_send_attempt();
                return Ok(Some((OrderStatus::ToTransferFailed, Some(error_note(reason)))));
            }
            Err(e) => {
                // Outcome unknown; the confirmation timer settles it
                warn!(order_id = %order.id, tx_id = %tx_id, replay = replay, error = %e, "Release send failed");
                false
            }
        };

        order.to_transfer.status = TransferStatus::Transferring;
        self.transition(order, OrderStatus::ToTransferring, None)
            .await?;
        if !sent {
            return Ok(None);
        }

        let max_wait = self.config.send_max_wait();
        let poll_delay = self.config.send_poll_delay();
        let result = tokio::time::timeout(
            max_wait + poll_delay,
            provider.poll_result(&chain_id, &tx_id, max_wait, poll_delay),
        )
        .await;

        let next = match result {
            Ok(Ok(result)) => match result.status {
                TxResultStatus::Mined => {
                    order.to_transfer.status = TransferStatus::Transferred;
                    order.to_transfer.tx_height = result.block_height;
                    Some((OrderStatus::ToTransferred, None))
                }
                TxResultStatus::NodeValidationFailed | TxResultStatus::Failed => {
                    let reason = result
                        .error
                        .unwrap_or_else(|| format!("{:?}", result.status));
                    warn!(order_id = %order.id, tx_id = %tx_id, reason = %reason, "Release transaction failed on chain");
                    order.clear_send_attempt();
                    Some((OrderStatus::ToTransferFailed, Some(error_note(reason))))
                }
                status => {
                    debug!(order_id = %order.id, status = ?status, "Release not final yet");
                    None
                }
            },
            Ok(Err(e)) => {
                warn!(order_id = %order.id, error = %e, "Polling release result failed");
                None
            }
            Err(_) => {
                debug!(order_id = %order.id, "Release wait timed out, still pending");
                None
            }
        };
        Ok(next)
    }

    async fn build_release(&self, order: &Order) -> Result<ChainTransaction, RelayError> {
        let to = &order.to_transfer;
        let chain = self.chains.chain(&to.chain_id)?;
        let provider = self.chains.provider(&to.chain_id)?;

        let decimals = self.chains.decimals(&to.chain_id, &to.symbol)?;
        let amount = to_chain_amount(to.amount, decimals)?;
        let contract = provider
            .contract_address(&to.chain_id, &chain.release_contract)
            .await?;

        let params = json!({
            "symbol": to.symbol,
            "to": to.to_address,
            "amount": amount.to_string(),
            "memo": order.memo(),
        });

        let tx = provider
            .create_transaction(
                &to.chain_id,
                &chain.release_account,
                &contract,
                RELEASE_METHOD,
                &params,
            )
            .await?;
        Ok(provider.sign_transaction(&to.chain_id, tx).await?)
    }

    async fn hand_to_timer(&self, order: &mut Order) -> Result<Step, RelayError> {
        if order.extension.is_forward == Some(true) {
            debug!(order_id = %order.id, status = %order.status, "Already forwarded to timer");
            return Ok(Step::Wait);
        }

        if !self.rewatch(order) {
            error!(order_id = %order.id, "Awaiting confirmation without a transaction id");
            order.to_transfer.status = TransferStatus::Failed;
            self.transition(
                order,
                OrderStatus::ToTransferFailed,
                Some(error_note("missing destination transaction id")),
            )
            .await?;
            return Ok(Step::Continue);
        }

        order.extension.is_forward = Some(true);
        self.save(order).await?;
        Ok(Step::Wait)
    }

    async fn transfer_failed(&self, order: &mut Order) -> Result<Step, RelayError> {
        let retry = self
            .retry
            .should_retry(
                order.id,
                OrderStatus::ToStartTransfer,
                self.config.max_transfer_retries,
            )
            .await?;

        if !retry {
            warn!(order_id = %order.id, max = self.config.max_transfer_retries, "Retry budget exhausted");
            self.transition(order, OrderStatus::Failed, None).await?;
            return Ok(Step::Continue);
        }

        // Any stored attempt stays; the retry replays it
        order.extension.is_forward = None;
        self.save(order).await?;
        self.retry.schedule_retry(order.id, OrderStatus::ToStartTransfer);
        Ok(Step::Wait)
    }

    fn release_registrations(&self, order: &Order) {
        self.custody
            .unregister(Some(order.third_party_order_id.clone()), Some(order.id));
        self.timers.normal.unwatch(order.id);
        self.timers.fast.unwatch(order.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_amount_scaling() {
        assert_eq!(
            to_chain_amount(Decimal::from(10), 6).unwrap().to_string(),
            "10000000"
        );
        assert_eq!(
            to_chain_amount(Decimal::new(12345, 4), 2).unwrap().to_string(),
            "123"
        );
        // Half rounds away from zero
        assert_eq!(
            to_chain_amount(Decimal::new(125, 3), 2).unwrap().to_string(),
            "13"
        );
        assert_eq!(
            to_chain_amount(Decimal::new(15, 1), 0).unwrap().to_string(),
            "2"
        );
    }

    #[test]
    fn test_chain_amount_rejects_non_positive() {
        assert!(to_chain_amount(Decimal::ZERO, 6).is_err());
        assert!(to_chain_amount(Decimal::new(1, 9), 6).is_err());
        assert!(to_chain_amount(Decimal::from(-1), 6).is_err());
        assert!(to_chain_amount(Decimal::ONE, 30).is_err());
    }

    #[test]
    fn test_injected_status_guard() {
        use OrderStatus::*;
        assert!(accepts_injected(ToTransferring, ToTransferConfirmed));
        assert!(accepts_injected(ToTransferred, ToTransferFailed));
        assert!(accepts_injected(ToTransferFailed, ToStartTransfer));

        assert!(!accepts_injected(Finish, ToTransferConfirmed));
        assert!(!accepts_injected(ToStartTransfer, ToStartTransfer));
        assert!(!accepts_injected(ToTransferring, Finish));
    }
}
