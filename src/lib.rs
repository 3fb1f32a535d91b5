//! xchain_relay - Cross-chain Deposit Relay
//!
//! A custody provider reports deposits to user addresses on a source chain; the
//! relay releases the matching asset on the destination chain. Each deposit is
//! an order driven by its own actor through a persisted state machine.
//!
//! # Modules
//!
//! - [`order`] - Order record, statuses and the status-flow recorder
//! - [`store`] - Order and flow persistence (in-memory, PostgreSQL)
//! - [`chain`] - Chain provider contract, registry and fallback provider
//! - [`relay`] - Per-order actors and the deposit state machine
//! - [`timer`] - Confirmation timers, retry loop and watchdog
//! - [`custody`] - Custody callback handling and polling
//! - [`swap`] - Swap sub-flow seam
//! - [`notify`] - Alarm and audit sinks
//! - [`gateway`] - HTTP callback surface
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup

pub mod chain;
pub mod config;
pub mod custody;
pub mod gateway;
pub mod logging;
pub mod notify;
pub mod order;
pub mod relay;
pub mod store;
pub mod swap;
pub mod timer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use order::{Order, OrderStatus, TransferInfo, TransferStatus};
pub use relay::{ActorRegistry, DepositProcessor, OrderDriver, RelayError};
