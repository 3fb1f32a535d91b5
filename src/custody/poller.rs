//! Custody polling
//!
//! Transactions last reported "pending" are re-fetched on a fixed cadence, so a
//! lost "success" callback doesn't strand the deposit. Success results take the
//! same path as a verified callback.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::callback::CustodyCallbackHandler;
use super::client::CustodyClient;
use crate::config::TimerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCommand {
    Register {
        tx_id: String,
        order_id: Option<Uuid>,
    },
    /// Drop registrations matching either key
    Unregister {
        tx_id: Option<String>,
        order_id: Option<Uuid>,
    },
}

#[derive(Clone)]
pub struct CustodyPollerHandle {
    tx: mpsc::UnboundedSender<PollCommand>,
}

impl CustodyPollerHandle {
    pub fn register(&self, tx_id: &str, order_id: Option<Uuid>) {
        let _ = self.tx.send(PollCommand::Register {
            tx_id: tx_id.to_string(),
            order_id,
        });
    }

    /// Idempotent
    pub fn unregister(&self, tx_id: Option<String>, order_id: Option<Uuid>) {
        let _ = self.tx.send(PollCommand::Unregister { tx_id, order_id });
    }
}

pub fn poller_channel() -> (CustodyPollerHandle, mpsc::UnboundedReceiver<PollCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CustodyPollerHandle { tx }, rx)
}

pub struct CustodyPoller {
    rx: mpsc::UnboundedReceiver<PollCommand>,
    /// provider tx id -> order id once known
    registrations: HashMap<String, Option<Uuid>>,
    client: Arc<dyn CustodyClient>,
    handler: Arc<CustodyCallbackHandler>,
    timing: TimerConfig,
}

impl CustodyPoller {
    pub fn new(
        rx: mpsc::UnboundedReceiver<PollCommand>,
        client: Arc<dyn CustodyClient>,
        handler: Arc<CustodyCallbackHandler>,
        timing: TimerConfig,
    ) -> Self {
        Self {
            rx,
            registrations: HashMap::new(),
            client,
            handler,
            timing,
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn is_registered(&self, tx_id: &str) -> bool {
        self.registrations.contains_key(tx_id)
    }

    pub async fn run(mut self) {
        info!(period_ms = self.timing.period_ms, "Starting custody poller");

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
    }

    fn apply(&mut self, cmd: PollCommand) {
        match cmd {
            PollCommand::Register { tx_id, order_id } => {
                let slot = self.registrations.entry(tx_id).or_insert(None);
                if order_id.is_some() {
                    *slot = order_id;
                }
            }
            PollCommand::Unregister { tx_id, order_id } => {
                if let Some(tx_id) = tx_id {
                    self.registrations.remove(&tx_id);
                }
                if let Some(order_id) = order_id {
                    self.registrations.retain(|_, o| *o != Some(order_id));
                }
            }
        }
    }

    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply(cmd);
        }
    }

    /// Re-fetch every registered transaction; returns how many were settled or dropped
    pub async fn sweep(&mut self) -> usize {
        let tx_ids: Vec<String> = self.registrations.keys().cloned().collect();
        let mut settled = 0;

        for tx_id in tx_ids {
            let transaction = match self.client.get_transaction(&tx_id).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(tx_id = %tx_id, error = %e, "Custody poll failed");
                    continue;
                }
            };

            if transaction.is_pending() {
                debug!(tx_id = %tx_id, confirmed = transaction.confirmed_num, "Custody transaction still pending");
                continue;
            }

            if transaction.is_success() {
                match self.handler.accept_fetched(&transaction).await {
                    Ok(outcome) => {
                        info!(tx_id = %tx_id, outcome = ?outcome, "Polled custody transaction settled");
                    }
                    Err(e) if e.is_transient() => {
                        warn!(tx_id = %tx_id, error = %e, "Polled custody transaction not accepted");
                        continue;
                    }
                    Err(e) => {
                        // Refetching cannot change the answer
                        error!(tx_id = %tx_id, code = e.code(), error = %e, "Polled custody transaction rejected, dropping registration");
                    }
                }
            } else {
                info!(tx_id = %tx_id, status = %transaction.status, "Custody transaction ended without success");
            }

            self.registrations.remove(&tx_id);
            settled += 1;
        }

        self.handler.prune_snapshots();
        settled
    }
}
