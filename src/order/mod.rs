//! Deposit Order Model
//!
//! Order record, transfer legs, status enums and the status-flow recorder.
//!
//! # Dispatch fields
//!
//! Only `Order::status` and the typed extension (`need_swap`, `swap_stage`,
//! `is_forward`) steer the state machine. Every other field is payload.

pub mod flow;
pub mod status;
pub mod types;

pub use flow::{FLOW_KEY_ERROR, FlowExtension, StatusFlowEntry, StatusFlowRecorder, count_status};
pub use status::{OrderStatus, TransferStatus};
pub use types::{
    FeeInfo, Order, OrderExtension, OrderType, SwapStage, TransferInfo, ext_keys, now_millis,
};
