use std::collections::HashMap;
use std::sync::Arc;

use super::{ChainError, ChainFamily, ChainProvider};
use crate::config::ChainConfig;

/// Resolves a chain id to its settings and to the provider of its family
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ChainFamily, Arc<dyn ChainProvider>>,
    chains: HashMap<String, ChainConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, family: ChainFamily, provider: Arc<dyn ChainProvider>) {
        self.providers.insert(family, provider);
    }

    pub fn register_chain(&mut self, chain: ChainConfig) {
        self.chains.insert(chain.chain_id.clone(), chain);
    }

    pub fn chain(&self, chain_id: &str) -> Result<&ChainConfig, ChainError> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))
    }

    pub fn provider(&self, chain_id: &str) -> Result<Arc<dyn ChainProvider>, ChainError> {
        let chain = self.chain(chain_id)?;
        self.providers
            .get(&chain.family)
            .cloned()
            .ok_or_else(|| {
                ChainError::UnknownChain(format!("no {} provider for {}", chain.family, chain_id))
            })
    }

    /// Decimals of `symbol` on `chain_id`
    pub fn decimals(&self, chain_id: &str, symbol: &str) -> Result<u32, ChainError> {
        self.chain(chain_id)?
            .assets
            .get(symbol)
            .copied()
            .ok_or_else(|| ChainError::UnknownChain(format!("{} not listed on {}", symbol, chain_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainProvider;

    fn chain(chain_id: &str, family: ChainFamily) -> ChainConfig {
        ChainConfig {
            chain_id: chain_id.to_string(),
            network: "AELF".to_string(),
            family,
            release_account: "release".to_string(),
            release_contract: "TokenPool".to_string(),
            required_confirmations: 1,
            assets: HashMap::from([("USDT".to_string(), 6)]),
        }
    }

    #[test]
    fn test_resolves_provider_by_family() {
        let mut registry = ProviderRegistry::new();
        registry.register_provider(ChainFamily::Native, Arc::new(MockChainProvider::new("aelf")));
        registry.register_chain(chain("tDVV", ChainFamily::Native));
        registry.register_chain(chain("SOL", ChainFamily::Solana));

        assert_eq!(registry.provider("tDVV").unwrap().name(), "aelf");
        assert_eq!(registry.decimals("tDVV", "USDT").unwrap(), 6);

        assert!(matches!(registry.provider("SOL"), Err(ChainError::UnknownChain(_))));
        assert!(registry.provider("BSC").is_err());
        assert!(registry.decimals("tDVV", "ELF").is_err());
    }
}
