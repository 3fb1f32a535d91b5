use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_PENDING: &str = "pending";
pub const SIDE_DEPOSIT: &str = "deposit";

/// Transaction as reported by the custody provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyTransaction {
    /// Provider transaction id, the deduplication key
    pub id: String,
    pub coin: String,
    #[serde(default)]
    pub display_code: String,
    /// Decimals of `amount`
    pub decimal: u32,
    /// Deposit address credited
    pub address: String,
    #[serde(default)]
    pub source_address: String,
    #[serde(default)]
    pub side: String,
    /// Integer amount in the coin's smallest unit
    pub amount: String,
    /// On-chain transaction hash
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub memo: String,
    pub status: String,
    #[serde(default)]
    pub confirmed_num: u32,
    #[serde(default)]
    pub confirming_threshold: u32,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default)]
    pub last_time: i64,
}

impl CustodyTransaction {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    pub fn is_pending(&self) -> bool {
        self.status == STATUS_PENDING
    }

    pub fn is_deposit(&self) -> bool {
        self.side.is_empty() || self.side == SIDE_DEPOSIT
    }

    /// `amount` scaled down by `decimal`
    pub fn whole_amount(&self) -> Result<Decimal, String> {
        let raw = Decimal::from_str(&self.amount)
            .map_err(|e| format!("invalid amount {:?}: {}", self.amount, e))?;
        let mut scaled = raw;
        scaled
            .set_scale(self.decimal)
            .map_err(|e| format!("invalid decimal {}: {}", self.decimal, e))?;
        if !raw.fract().is_zero() {
            return Err(format!("amount {} is not an integer", self.amount));
        }
        Ok(scaled.normalize())
    }

    /// Fields that must match between a callback and the provider's own record
    pub fn check_agrees_with(&self, other: &CustodyTransaction) -> Result<(), String> {
        let mismatch = |field: &str, a: &dyn std::fmt::Display, b: &dyn std::fmt::Display| {
            Err(format!("{} mismatch: {} vs {}", field, a, b))
        };

        if self.id != other.id {
            return mismatch("id", &self.id, &other.id);
        }
        if self.status != other.status {
            return mismatch("status", &self.status, &other.status);
        }
        if self.coin != other.coin {
            return mismatch("coin", &self.coin, &other.coin);
        }
        if self.decimal != other.decimal {
            return mismatch("decimal", &self.decimal, &other.decimal);
        }
        if !self.address.eq_ignore_ascii_case(&other.address) {
            return mismatch("address", &self.address, &other.address);
        }
        if self.whole_amount()? != other.whole_amount()? {
            return mismatch("amount", &self.amount, &other.amount);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::usdt_deposit;
    use super::*;

    #[test]
    fn test_whole_amount() {
        let tx = usdt_deposit("1", STATUS_SUCCESS);
        assert_eq!(tx.whole_amount().unwrap(), Decimal::from(10));

        let mut odd = tx.clone();
        odd.amount = "1234567".to_string();
        assert_eq!(odd.whole_amount().unwrap(), Decimal::new(1234567, 6));

        odd.amount = "12.5".to_string();
        assert!(odd.whole_amount().is_err());
        odd.amount = "abc".to_string();
        assert!(odd.whole_amount().is_err());
    }

    #[test]
    fn test_agreement_checks_each_field() {
        let a = usdt_deposit("1", STATUS_SUCCESS);
        assert!(a.check_agrees_with(&a.clone()).is_ok());

        let mut b = a.clone();
        b.amount = "10000001".to_string();
        assert!(a.check_agrees_with(&b).unwrap_err().contains("amount"));

        let mut b = a.clone();
        b.status = STATUS_PENDING.to_string();
        assert!(a.check_agrees_with(&b).unwrap_err().contains("status"));

        let mut b = a.clone();
        b.address = "0xDEPOSIT".to_string();
        assert!(a.check_agrees_with(&b).is_ok());

        let mut b = a.clone();
        b.decimal = 18;
        assert!(a.check_agrees_with(&b).is_err());
    }

    #[test]
    fn test_deserialize_callback_body() {
        let body = r#"{"id":"20240101","coin":"ETH_USDT","decimal":6,"address":"0xdeposit",
            "side":"deposit","amount":"5000000","status":"success","txid":"0xabc"}"#;
        let tx: CustodyTransaction = serde_json::from_str(body).unwrap();
        assert!(tx.is_success());
        assert!(tx.is_deposit());
        assert_eq!(tx.whole_amount().unwrap(), Decimal::from(5));
    }
}
