//! Custody Integration
//!
//! Inbound side of the relay: the custody provider reports deposits to its
//! addresses through signed webhooks. A verified, re-fetched "success" creates
//! exactly one deposit order; "pending" only updates a snapshot and registers
//! the transaction for polling.
//!
//! # Modules
//!
//! - `types` - provider transaction payload
//! - `signature` - Ed25519 callback verification
//! - `client` - REST client used to re-fetch transactions
//! - `coin_map` / `routes` - coin code and deposit address resolution
//! - `snapshot` - last-seen payload per transaction
//! - `callback` - the handler tying it together
//! - `poller` - periodic re-fetch of pending transactions

pub mod callback;
pub mod client;
pub mod coin_map;
pub mod poller;
pub mod routes;
pub mod signature;
pub mod snapshot;
pub mod types;

pub use callback::{CallbackDeps, CallbackError, CallbackOutcome, CustodyCallbackHandler};
pub use client::{CustodyClient, CustodyClientError, HttpCustodyClient};
pub use coin_map::CoinMap;
pub use poller::{CustodyPoller, CustodyPollerHandle, PollCommand, poller_channel};
pub use routes::{DepositRoute, DepositRoutes, InMemoryDepositRoutes};
pub use signature::CallbackVerifier;
pub use snapshot::{Snapshot, SnapshotStore};
pub use types::CustodyTransaction;
