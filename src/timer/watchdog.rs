//! Sanity-check watchdog
//!
//! Every order that enters the release flow gets a deadline. When it passes and
//! the order still isn't terminal, an alarm goes out; the order itself is left
//! untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TimerConfig;
use crate::notify::{Alarms, params, templates};
use crate::store::OrderStore;

#[derive(Clone)]
pub struct WatchdogHandle {
    tx: mpsc::UnboundedSender<(Uuid, Instant)>,
    delay: Duration,
}

impl WatchdogHandle {
    pub fn register(&self, order_id: Uuid) {
        if self.tx.send((order_id, Instant::now() + self.delay)).is_err() {
            warn!(order_id = %order_id, "Watchdog stopped, deadline dropped");
        }
    }
}

pub struct Watchdog {
    rx: mpsc::UnboundedReceiver<(Uuid, Instant)>,
    deadlines: HashMap<Uuid, Instant>,
    store: Arc<dyn OrderStore>,
    alarms: Alarms,
    timing: TimerConfig,
}

impl Watchdog {
    pub fn channel(delay: Duration) -> (WatchdogHandle, mpsc::UnboundedReceiver<(Uuid, Instant)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WatchdogHandle { tx, delay }, rx)
    }

    pub fn new(
        rx: mpsc::UnboundedReceiver<(Uuid, Instant)>,
        store: Arc<dyn OrderStore>,
        alarms: Alarms,
        timing: TimerConfig,
    ) -> Self {
        Self {
            rx,
            deadlines: HashMap::new(),
            store,
            alarms,
            timing,
        }
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub async fn run(mut self) {
        info!(period_ms = self.timing.period_ms, "Starting watchdog");

        let start = Instant::now() + self.timing.initial_delay();
        let mut ticker = tokio::time::interval_at(start, self.timing.period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                entry = self.rx.recv() => match entry {
                    Some((order_id, due)) => { self.deadlines.insert(order_id, due); }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.drain_commands();
                    self.sweep(Instant::now()).await;
                }
            }
        }
    }

    pub fn drain_commands(&mut self) {
        while let Ok((order_id, due)) = self.rx.try_recv() {
            self.deadlines.insert(order_id, due);
        }
    }

    /// Check every deadline that passed; returns the number of alarms raised
    pub async fn sweep(&mut self, now: Instant) -> usize {
        let due: Vec<Uuid> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut alarmed = 0;
        for order_id in due {
            let order = match self.store.get(order_id).await {
                Ok(order) => order,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Watchdog lookup failed");
                    continue;
                }
            };
            self.deadlines.remove(&order_id);

            match order {
                Some(order) if !order.status.is_terminal() => {
                    warn!(order_id = %order_id, status = %order.status, "Order not finished before watchdog deadline");
                    self.alarms
                        .raise(
                            templates::ORDER_NOT_FINISHED,
                            params([
                                ("order_id", order_id.to_string()),
                                ("status", order.status.to_string()),
                            ]),
                        )
                        .await;
                    alarmed += 1;
                }
                Some(_) => debug!(order_id = %order_id, "Watchdog: order finished"),
                None => warn!(order_id = %order_id, "Watchdog: order vanished"),
            }
        }
        alarmed
    }
}
