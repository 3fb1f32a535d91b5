use std::collections::HashMap;

use crate::config::CoinMapping;

/// Custody coin code -> source network/symbol
#[derive(Debug, Clone, Default)]
pub struct CoinMap {
    coins: HashMap<String, CoinMapping>,
}

impl CoinMap {
    pub fn new(mappings: impl IntoIterator<Item = CoinMapping>) -> Self {
        Self {
            coins: mappings
                .into_iter()
                .map(|m| (m.coin.clone(), m))
                .collect(),
        }
    }

    pub fn lookup(&self, coin: &str) -> Option<&CoinMapping> {
        self.coins.get(coin)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let map = CoinMap::new([CoinMapping {
            coin: "ETH_USDT".to_string(),
            network: "ETH".to_string(),
            chain_id: "ETH".to_string(),
            symbol: "USDT".to_string(),
            min_amount: None,
        }]);

        assert_eq!(map.lookup("ETH_USDT").map(|m| m.symbol.as_str()), Some("USDT"));
        assert!(map.lookup("TRON_USDT").is_none());
        assert_eq!(map.len(), 1);
    }
}
