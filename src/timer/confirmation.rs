//! Confirmation Timer
//!
//! Single-writer loop over the pending-watch map. Commands arrive over an
//! unbounded channel so an order actor never waits on the timer; the sweep and
//! command handling run on the same task, so "observe" and "remove" can't race.
//!
//! A watch is removed only after the owning actor acknowledged the terminal
//! result (at-least-once delivery). Results of one sweep are reported
//! concurrently: an actor busy in its send wait delays only its own report.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{ProviderRegistry, TxConfirmation};
use crate::config::TimerConfig;
use crate::order::{FLOW_KEY_ERROR, FlowExtension, OrderStatus};
use crate::relay::OrderDriver;

/// Which leg of the order a watch follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Source,
    Destination,
}

/// Polling cadence class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchClass {
    Normal,
    /// Transfers following a swap to the main chain
    Fast,
}

impl fmt::Display for WatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchClass::Normal => write!(f, "normal"),
            WatchClass::Fast => write!(f, "fast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWatch {
    pub order_id: Uuid,
    pub chain_id: String,
    pub tx_id: String,
    /// When the transaction was observed/sent (epoch millis)
    pub observed_time: i64,
    pub leg: Leg,
    pub forward: bool,
    /// Consecutive "not found" polls
    pub not_found: u32,
}

impl PendingWatch {
    pub fn destination(order_id: Uuid, chain_id: &str, tx_id: &str, observed_time: i64) -> Self {
        Self {
            order_id,
            chain_id: chain_id.to_string(),
            tx_id: tx_id.to_string(),
            observed_time,
            leg: Leg::Destination,
            forward: true,
            not_found: 0,
        }
    }
}

#[derive(Debug)]
pub enum WatchCommand {
    Watch(PendingWatch),
    Unwatch(Uuid),
}

/// Sender side used by order actors
#[derive(Clone)]
pub struct TimerHandle {
    class: WatchClass,
    tx: mpsc::UnboundedSender<WatchCommand>,
}

impl TimerHandle {
    pub fn class(&self) -> WatchClass {
        self.class
    }

    /// Register (or replace) the watch for an order
    pub fn watch(&self, watch: PendingWatch) {
        let order_id = watch.order_id;
        if self.tx.send(WatchCommand::Watch(watch)).is_err() {
            warn!(order_id = %order_id, class = %self.class, "Confirmation timer stopped, watch dropped");
        }
    }

    pub fn unwatch(&self, order_id: Uuid) {
        let _ = self.tx.send(WatchCommand::Unwatch(order_id));
    }
}

/// Create the command channel of one timer class
pub fn timer_channel(class: WatchClass) -> (TimerHandle, mpsc::UnboundedReceiver<WatchCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TimerHandle { class, tx }, rx)
}

pub struct ConfirmationTimer {
    class: WatchClass,
    rx: mpsc::UnboundedReceiver<WatchCommand>,
    watches: HashMap<Uuid, PendingWatch>,
    chains: Arc<ProviderRegistry>,
    driver: Arc<dyn OrderDriver>,
    timing: TimerConfig,
    max_not_found: u32,
}

impl ConfirmationTimer {
    pub fn new(
        class: WatchClass,
        rx: mpsc::UnboundedReceiver<WatchCommand>,
        chains: Arc<ProviderRegistry>,
        driver: Arc<dyn OrderDriver>,
        timing: TimerConfig,
        max_not_found: u32,
    ) -> Self {
        Self {
            class,
            rx,
            watches: HashMap::new(),
            chains,
            driver,
            timing,
            max_not_found,
        }
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn contains(&self, order_id: &Uuid) -> bool {
        self.watches.contains_key(order_id)
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        info!(
            class = %self.class,
            initial_delay_ms = self.timing.initial_delay_ms,
            period_ms = self.timing.period_ms,
            "Starting confirmation timer"
        );

        let start = tokio::time::Instant::now() + self.timing.initial_delay();
        let mut ticker = tokio::time::interval_at(start, self.timing.period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.drain_commands();
                    self.sweep().await;
                }
            }
        }

        info!(class = %self.class, "Confirmation timer stopped");
    }

    fn apply(&mut self, cmd: WatchCommand) {
        match cmd {
            WatchCommand::Watch(watch) => {
                debug!(order_id = %watch.order_id, tx_id = %watch.tx_id, class = %self.class, "Watch registered");
                self.watches.insert(watch.order_id, watch);
            }
            WatchCommand::Unwatch(order_id) => {
                self.watches.remove(&order_id);
            }
        }
    }

    /// Apply every queued command without waiting
    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply(cmd);
        }
    }

    /// One pass over all watches; returns how many were resolved
    pub async fn sweep(&mut self) -> usize {
        let order_ids: Vec<Uuid> = self.watches.keys().copied().collect();
        let mut reports = JoinSet::new();

        for order_id in order_ids {
            let Some(watch) = self.watches.get_mut(&order_id) else {
                continue;
            };

            let Some((status, note)) = Self::observe(&self.chains, watch, self.max_not_found).await
            else {
                continue;
            };

            let driver = self.driver.clone();
            reports.spawn(async move {
                let result = driver.advance(order_id, status, note).await;
                (order_id, status, result)
            });
        }

        let mut resolved = 0;
        while let Some(joined) = reports.join_next().await {
            match joined {
                Ok((order_id, status, Ok(accepted))) => {
                    if !accepted {
                        debug!(order_id = %order_id, status = %status, "Stale watch result dropped");
                    }
                    self.watches.remove(&order_id);
                    resolved += 1;
                }
                Ok((order_id, status, Err(e))) => {
                    // Keep the watch; the next tick reports again
                    warn!(order_id = %order_id, status = %status, error = %e, "Failed to report watch result");
                }
                Err(e) => warn!(class = %self.class, error = %e, "Watch report task failed"),
            }
        }

        resolved
    }

    /// Terminal result of a watch, if any
    async fn observe(
        chains: &ProviderRegistry,
        watch: &mut PendingWatch,
        max_not_found: u32,
    ) -> Option<(OrderStatus, Option<FlowExtension>)> {
        let (provider, required) = match chains
            .provider(&watch.chain_id)
            .and_then(|p| Ok((p, chains.chain(&watch.chain_id)?.required_confirmations)))
        {
            Ok(found) => found,
            Err(e) => {
                warn!(order_id = %watch.order_id, chain_id = %watch.chain_id, error = %e, "No provider for watch");
                return None;
            }
        };

        let confirmation = match provider.query_transaction(&watch.chain_id, &watch.tx_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(order_id = %watch.order_id, tx_id = %watch.tx_id, error = %e, "Confirmation query failed");
                return None;
            }
        };

        match confirmation {
            TxConfirmation::Mined {
                height,
                confirmations,
                block_hash,
            } => {
                watch.not_found = 0;
                if confirmations < required {
                    debug!(
                        order_id = %watch.order_id,
                        confirmations = confirmations,
                        required = required,
                        "Awaiting confirmations"
                    );
                    return None;
                }
                let mut note = FlowExtension::new();
                note.insert("BlockHeight".to_string(), height.to_string());
                if let Some(hash) = block_hash {
                    note.insert("BlockHash".to_string(), hash);
                }
                Some((OrderStatus::ToTransferConfirmed, Some(note)))
            }
            TxConfirmation::Pending => {
                watch.not_found = 0;
                None
            }
            TxConfirmation::NotFound => {
                watch.not_found += 1;
                if watch.not_found < max_not_found {
                    return None;
                }
                let reason = format!("transaction not found after {} polls", watch.not_found);
                Some((OrderStatus::ToTransferFailed, Some(error_note(reason))))
            }
            TxConfirmation::Failed(reason) => {
                Some((OrderStatus::ToTransferFailed, Some(error_note(reason))))
            }
        }
    }
}

fn error_note(reason: String) -> FlowExtension {
    FlowExtension::from([(FLOW_KEY_ERROR.to_string(), reason)])
}
