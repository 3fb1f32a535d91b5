//! Last-seen custody payloads
//!
//! Keeps the latest payload per provider transaction id and an update counter.
//! Orders are never created from here; the snapshot only answers "seen before?"
//! and "already alarmed?". Entries nothing settles age out through [`SnapshotStore::prune`].

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::types::CustodyTransaction;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub transaction: CustodyTransaction,
    pub updates: u64,
    /// Alarms raised for an unmapped coin on this transaction
    pub unmapped_alarms: u32,
    pub last_seen: Instant,
}

impl Snapshot {
    fn new(transaction: &CustodyTransaction) -> Self {
        Self {
            transaction: transaction.clone(),
            updates: 0,
            unmapped_alarms: 0,
            last_seen: Instant::now(),
        }
    }
}

#[derive(Default)]
pub struct SnapshotStore {
    snapshots: DashMap<String, Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the payload and return its update count
    pub fn record(&self, transaction: &CustodyTransaction) -> u64 {
        let mut entry = self
            .snapshots
            .entry(transaction.id.clone())
            .or_insert_with(|| Snapshot::new(transaction));
        entry.transaction = transaction.clone();
        entry.updates += 1;
        entry.last_seen = Instant::now();
        entry.updates
    }

    /// True the first time it is asked for `transaction`
    pub fn claim_unmapped_alarm(&self, transaction: &CustodyTransaction) -> bool {
        let mut entry = self
            .snapshots
            .entry(transaction.id.clone())
            .or_insert_with(|| Snapshot::new(transaction));
        entry.unmapped_alarms += 1;
        entry.last_seen = Instant::now();
        entry.unmapped_alarms == 1
    }

    pub fn get(&self, id: &str) -> Option<Snapshot> {
        self.snapshots.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &str) {
        self.snapshots.remove(id);
    }

    /// Drop entries not touched within `max_age`; returns how many went
    pub fn prune(&self, max_age: Duration) -> usize {
        let before = self.snapshots.len();
        self.snapshots
            .retain(|_, snap| snap.last_seen.elapsed() <= max_age);
        before.saturating_sub(self.snapshots.len())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
