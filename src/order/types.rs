//! Order Core Types
//!
//! Canonical deposit order record plus its two embedded transfer legs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::status::{OrderStatus, TransferStatus};

/// Persisted extension keys
pub mod ext_keys {
    pub const NEED_SWAP: &str = "NeedSwap";
    pub const SWAP_STAGE: &str = "SwapStage";
    pub const IS_FORWARD: &str = "IsForward";
}

/// Current time in epoch millis
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Order type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderType {
    #[default]
    Deposit,
    Withdraw,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Deposit => "Deposit",
            OrderType::Withdraw => "Withdraw",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deposit" => Ok(OrderType::Deposit),
            "Withdraw" => Ok(OrderType::Withdraw),
            _ => Err(format!("Invalid order type: {}", s)),
        }
    }
}

/// Where the swap sub-flow left the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapStage {
    /// Swap sub-flow invoked
    Swapping,
    /// Swap delivered to the main chain; confirmation uses the fast timer class
    SwappedToMain,
    /// Swap failed, order rewritten to a plain transfer
    Fallback,
}

impl SwapStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStage::Swapping => "Swapping",
            SwapStage::SwappedToMain => "SwappedToMain",
            SwapStage::Fallback => "Fallback",
        }
    }
}

impl fmt::Display for SwapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Swapping" => Ok(SwapStage::Swapping),
            "SwappedToMain" => Ok(SwapStage::SwappedToMain),
            "Fallback" => Ok(SwapStage::Fallback),
            _ => Err(format!("Invalid swap stage: {}", s)),
        }
    }
}

/// Typed view of the order's extension info
///
/// Only `need_swap`, `swap_stage` and `is_forward` steer dispatch. Anything else
/// rides along in `extra`. Serialized as a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, String>",
    try_from = "BTreeMap<String, String>"
)]
pub struct OrderExtension {
    pub need_swap: bool,
    pub swap_stage: Option<SwapStage>,
    /// `Some(false)`: transition persisted but not yet forwarded.
    /// `Some(true)`: already forwarded, duplicate deliveries are dropped.
    pub is_forward: Option<bool>,
    pub extra: BTreeMap<String, String>,
}

impl OrderExtension {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert(ext_keys::NEED_SWAP.to_string(), self.need_swap.to_string());
        if let Some(stage) = self.swap_stage {
            map.insert(ext_keys::SWAP_STAGE.to_string(), stage.to_string());
        }
        if let Some(forward) = self.is_forward {
            map.insert(ext_keys::IS_FORWARD.to_string(), forward.to_string());
        }
        map
    }

    pub fn from_map(mut map: BTreeMap<String, String>) -> Result<Self, String> {
        let need_swap = match map.remove(ext_keys::NEED_SWAP) {
            Some(v) => v
                .parse::<bool>()
                .map_err(|_| format!("Invalid {}: {}", ext_keys::NEED_SWAP, v))?,
            None => false,
        };
        let swap_stage = match map.remove(ext_keys::SWAP_STAGE) {
            Some(v) if !v.is_empty() => Some(v.parse::<SwapStage>()?),
            _ => None,
        };
        let is_forward = match map.remove(ext_keys::IS_FORWARD) {
            Some(v) => Some(
                v.parse::<bool>()
                    .map_err(|_| format!("Invalid {}: {}", ext_keys::IS_FORWARD, v))?,
            ),
            None => None,
        };
        Ok(Self {
            need_swap,
            swap_stage,
            is_forward,
            extra: map,
        })
    }
}

impl From<OrderExtension> for BTreeMap<String, String> {
    fn from(ext: OrderExtension) -> Self {
        ext.to_map()
    }
}

impl TryFrom<BTreeMap<String, String>> for OrderExtension {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        OrderExtension::from_map(map)
    }
}

/// Fee charged on a transfer leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeInfo {
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    pub decimals: u32,
}

/// One leg (source or destination) of a cross-chain transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub network: String,
    pub chain_id: String,
    pub tx_id: Option<String>,
    pub tx_time: Option<i64>,
    pub tx_height: Option<u64>,
    pub symbol: String,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub from_address: String,
    pub to_address: String,
    pub block_hash: Option<String>,
    #[serde(default)]
    pub fees: Vec<FeeInfo>,
}

/// Deposit order
///
/// Exclusively mutated by its order actor. `from_raw_transaction` holds the hex
/// encoded signed destination transaction of the current send attempt; it is
/// replayed verbatim on resume and only regenerated after being cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: u64,
    pub order_type: OrderType,
    pub third_party_order_id: String,
    pub third_party_service: String,
    pub from_transfer: TransferInfo,
    pub to_transfer: TransferInfo,
    pub status: OrderStatus,
    #[serde(default)]
    pub extension: OrderExtension,
    pub create_time: i64,
    pub last_modify_time: i64,
    pub expire_time: i64,
    pub arrival_time: Option<i64>,
    pub from_raw_transaction: Option<String>,
}

impl Order {
    /// Create a deposit order whose source leg is already confirmed by custody
    pub fn new_deposit(
        user_id: u64,
        third_party_service: impl Into<String>,
        third_party_order_id: impl Into<String>,
        from_transfer: TransferInfo,
        to_transfer: TransferInfo,
        ttl_ms: i64,
    ) -> Self {
        let now = now_millis();
        let need_swap = from_transfer.symbol != to_transfer.symbol;
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_type: OrderType::Deposit,
            third_party_order_id: third_party_order_id.into(),
            third_party_service: third_party_service.into(),
            from_transfer,
            to_transfer,
            status: OrderStatus::FromTransferConfirmed,
            extension: OrderExtension {
                need_swap,
                ..Default::default()
            },
            create_time: now,
            last_modify_time: now,
            expire_time: now + ttl_ms,
            arrival_time: None,
            from_raw_transaction: None,
        }
    }

    /// Memo attached to the release transaction: order id without separators
    pub fn memo(&self) -> String {
        self.id.simple().to_string()
    }

    pub fn touch(&mut self) {
        self.last_modify_time = now_millis();
    }

    /// Rewrite a swap order into a plain transfer of the source asset
    ///
    /// Afterwards the order is indistinguishable from one that never asked for a swap.
    pub fn fall_back_to_transfer(&mut self, stage: SwapStage) {
        self.to_transfer.symbol = self.from_transfer.symbol.clone();
        self.clear_send_attempt();
        self.extension.need_swap = false;
        self.extension.swap_stage = Some(stage);
        self.extension.is_forward = None;
        self.status = OrderStatus::ToStartTransfer;
    }

    /// Drop the signed bytes of the current attempt so the next send signs anew
    pub fn clear_send_attempt(&mut self) {
        self.to_transfer.tx_id = None;
        self.to_transfer.tx_time = None;
        self.to_transfer.tx_height = None;
        self.to_transfer.block_hash = None;
        self.to_transfer.status = TransferStatus::Initialized;
        self.from_raw_transaction = None;
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn deposit_order(from_symbol: &str, to_symbol: &str) -> Order {
        let from = TransferInfo {
            network: "ETH".to_string(),
            chain_id: "ETH".to_string(),
            tx_id: Some("0xsource".to_string()),
            symbol: from_symbol.to_string(),
            amount: Decimal::from(10),
            status: TransferStatus::Confirmed,
            from_address: "0xsender".to_string(),
            to_address: "0xdeposit".to_string(),
            ..Default::default()
        };
        let to = TransferInfo {
            network: "AELF".to_string(),
            chain_id: "tDVV".to_string(),
            symbol: to_symbol.to_string(),
            amount: Decimal::from(10),
            to_address: "ELF_receiver_tDVV".to_string(),
            ..Default::default()
        };
        Order::new_deposit(1001, "Cobo", "cobo-tx-1", from, to, 3_600_000)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::deposit_order;
    use super::*;

    #[test]
    fn test_new_deposit_sets_need_swap() {
        let plain = deposit_order("USDT", "USDT");
        assert!(!plain.extension.need_swap);
        assert_eq!(plain.status, OrderStatus::FromTransferConfirmed);

        let swap = deposit_order("USDT", "ELF");
        assert!(swap.extension.need_swap);
    }

    #[test]
    fn test_memo_has_no_separators() {
        let order = deposit_order("USDT", "USDT");
        let memo = order.memo();
        assert_eq!(memo.len(), 32);
        assert!(!memo.contains('-'));
    }

    #[test]
    fn test_fall_back_to_transfer() {
        let mut order = deposit_order("USDT", "ELF");
        order.to_transfer.tx_id = Some("0xswap".to_string());
        order.to_transfer.tx_time = Some(1);
        order.from_raw_transaction = Some("deadbeef".to_string());
        order.status = OrderStatus::ToTransferring;

        order.fall_back_to_transfer(SwapStage::Fallback);

        assert_eq!(order.to_transfer.symbol, "USDT");
        assert!(order.to_transfer.tx_id.is_none());
        assert!(order.to_transfer.tx_time.is_none());
        assert!(order.from_raw_transaction.is_none());
        assert!(!order.extension.need_swap);
        assert_eq!(order.extension.swap_stage, Some(SwapStage::Fallback));
        assert_eq!(order.status, OrderStatus::ToStartTransfer);
    }

    #[test]
    fn test_extension_map_boundary() {
        let mut ext = OrderExtension {
            need_swap: true,
            swap_stage: Some(SwapStage::SwappedToMain),
            is_forward: Some(false),
            ..Default::default()
        };
        ext.extra.insert("Channel".to_string(), "web".to_string());

        let map = ext.to_map();
        assert_eq!(map.get(ext_keys::NEED_SWAP).map(String::as_str), Some("true"));
        assert_eq!(
            map.get(ext_keys::SWAP_STAGE).map(String::as_str),
            Some("SwappedToMain")
        );
        assert_eq!(map.get(ext_keys::IS_FORWARD).map(String::as_str), Some("false"));

        let back = OrderExtension::from_map(map).unwrap();
        assert_eq!(back, ext);
    }

    #[test]
    fn test_extension_rejects_garbage() {
        let mut map = BTreeMap::new();
        map.insert(ext_keys::NEED_SWAP.to_string(), "yes".to_string());
        assert!(OrderExtension::from_map(map).is_err());
    }

    #[test]
    fn test_order_json_keeps_map_representation() {
        let order = deposit_order("USDT", "ELF");
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["extension"]["NeedSwap"], "true");

        let back: Order = serde_json::from_value(value).unwrap();
        assert_eq!(back, order);
    }
}
