//! Timer services
//!
//! Three single-writer loops turn wall-clock time into order progress:
//!
//! - [`ConfirmationTimer`]: polls destination transactions (normal and fast classes)
//! - [`RetryLoop`]: re-drives failed orders after a delay
//! - [`Watchdog`]: alarms on orders that outlive their deadline
//!
//! Each loop owns its map outright and receives registrations over an
//! unbounded channel; nothing else touches that state.

pub mod confirmation;
pub mod retry;
pub mod watchdog;

pub use confirmation::{
    ConfirmationTimer, Leg, PendingWatch, TimerHandle, WatchClass, WatchCommand, timer_channel,
};
pub use retry::{RetryCoordinator, RetryLoop, RetryRecord};
pub use watchdog::{Watchdog, WatchdogHandle};
