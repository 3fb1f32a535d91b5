//! Order and Transfer Status Definitions
//!
//! Status labels are the persisted string form (PostgreSQL `status` column and
//! status-flow entries), so `as_str()` values must never change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deposit order status
///
/// Source leg: `FromStartTransfer .. FromTransferConfirmed` (driven by custody).
/// Destination leg: `ToStartTransfer .. ToTransferConfirmed` (driven by the order actor).
/// Terminal: `Finish`, `Expired`, `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Initialized,
    Created,
    Pending,
    FromStartTransfer,
    FromTransferring,
    FromTransferred,
    FromTransferConfirmed,
    ToStartTransfer,
    ToTransferring,
    ToTransferred,
    ToTransferConfirmed,
    Finish,
    Expired,
    Failed,
    FromTransferFailed,
    ToTransferFailed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 16] = [
        OrderStatus::Initialized,
        OrderStatus::Created,
        OrderStatus::Pending,
        OrderStatus::FromStartTransfer,
        OrderStatus::FromTransferring,
        OrderStatus::FromTransferred,
        OrderStatus::FromTransferConfirmed,
        OrderStatus::ToStartTransfer,
        OrderStatus::ToTransferring,
        OrderStatus::ToTransferred,
        OrderStatus::ToTransferConfirmed,
        OrderStatus::Finish,
        OrderStatus::Expired,
        OrderStatus::Failed,
        OrderStatus::FromTransferFailed,
        OrderStatus::ToTransferFailed,
    ];

    /// No further input is consumed once an order is terminal
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Finish | OrderStatus::Expired | OrderStatus::Failed
        )
    }

    /// Statuses owned by the custody side; the deposit actor never acts on these
    #[inline]
    pub fn is_source_leg(&self) -> bool {
        matches!(
            self,
            OrderStatus::Initialized
                | OrderStatus::Created
                | OrderStatus::Pending
                | OrderStatus::FromStartTransfer
                | OrderStatus::FromTransferring
                | OrderStatus::FromTransferred
                | OrderStatus::FromTransferFailed
        )
    }

    /// Destination transaction is out and awaiting confirmation
    #[inline]
    pub fn is_awaiting_confirmation(&self) -> bool {
        matches!(self, OrderStatus::ToTransferring | OrderStatus::ToTransferred)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Initialized => "Initialized",
            OrderStatus::Created => "Created",
            OrderStatus::Pending => "Pending",
            OrderStatus::FromStartTransfer => "FromStartTransfer",
            OrderStatus::FromTransferring => "FromTransferring",
            OrderStatus::FromTransferred => "FromTransferred",
            OrderStatus::FromTransferConfirmed => "FromTransferConfirmed",
            OrderStatus::ToStartTransfer => "ToStartTransfer",
            OrderStatus::ToTransferring => "ToTransferring",
            OrderStatus::ToTransferred => "ToTransferred",
            OrderStatus::ToTransferConfirmed => "ToTransferConfirmed",
            OrderStatus::Finish => "Finish",
            OrderStatus::Expired => "Expired",
            OrderStatus::Failed => "Failed",
            OrderStatus::FromTransferFailed => "FromTransferFailed",
            OrderStatus::ToTransferFailed => "ToTransferFailed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid order status: {}", s))
    }
}

/// Per-leg transfer status
///
/// `Initialized -> StartTransfer -> Transferring -> Transferred/Failed -> Confirmed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferStatus {
    #[default]
    Initialized,
    StartTransfer,
    Transferring,
    Transferred,
    Failed,
    Confirmed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Initialized => "Initialized",
            TransferStatus::StartTransfer => "StartTransfer",
            TransferStatus::Transferring => "Transferring",
            TransferStatus::Transferred => "Transferred",
            TransferStatus::Failed => "Failed",
            TransferStatus::Confirmed => "Confirmed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
