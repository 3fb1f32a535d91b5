//! Deposit routes
//!
//! A deposit address on a source network belongs to exactly one user and
//! names where the funds go.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRoute {
    /// Source network of the deposit address
    pub network: String,
    pub address: String,
    pub user_id: u64,
    pub to_network: String,
    pub to_chain_id: String,
    pub to_address: String,
    pub to_symbol: String,
}

#[async_trait]
pub trait DepositRoutes: Send + Sync {
    async fn resolve(&self, network: &str, address: &str) -> Option<DepositRoute>;
}

/// Routes keyed by (network, lower-cased address)
#[derive(Default)]
pub struct InMemoryDepositRoutes {
    routes: DashMap<(String, String), DepositRoute>,
}

impl InMemoryDepositRoutes {
    pub fn new(routes: impl IntoIterator<Item = DepositRoute>) -> Self {
        let this = Self::default();
        for route in routes {
            this.insert(route);
        }
        this
    }

    pub fn insert(&self, route: DepositRoute) {
        let key = (route.network.clone(), route.address.to_lowercase());
        self.routes.insert(key, route);
    }
}

#[async_trait]
impl DepositRoutes for InMemoryDepositRoutes {
    async fn resolve(&self, network: &str, address: &str) -> Option<DepositRoute> {
        self.routes
            .get(&(network.to_string(), address.to_lowercase()))
            .map(|r| r.clone())
    }
}
