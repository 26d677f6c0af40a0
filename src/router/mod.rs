/*
 * Router registry: resolves logical exchange identifiers through the
 * swap helper's `routers` mapping
 */

use ethers::types::Address;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use crate::chain::ChainClient;
use crate::models::{Result, RouterId, SwapError};

pub const UNISWAP_V2: &str = "UniswapV2";
pub const UNISWAP_V3: &str = "UniswapV3";
pub const SUSHISWAP: &str = "Sushiswap";

pub const KNOWN_ROUTERS: [&str; 3] = [UNISWAP_V2, UNISWAP_V3, SUSHISWAP];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouterStatus {
    Configured { address: Address },
    NotConfigured,
    Unreachable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterCheck {
    pub name: String,
    pub router_id: RouterId,
    #[serde(flatten)]
    pub status: RouterStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterDiagnostics {
    pub chain_id: Option<u64>,
    pub swap_helper: Address,
    pub swap_helper_deployed: Option<bool>,
    pub routers: Vec<RouterCheck>,
}

pub struct RouterRegistry {
    chain: Arc<dyn ChainClient>,
    names: Vec<String>,
    resolved: Mutex<HashMap<RouterId, Address>>,
}

impl RouterRegistry {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, names: Vec<String>) -> Self {
        Self {
            chain,
            names,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a router id to its on-chain router. A zero address means the
    /// helper has no router registered for the id, which blocks the route.
    pub async fn resolve(&self, router_id: RouterId) -> Result<Address> {
        if let Some(address) = self.resolved.lock().await.get(&router_id) {
            return Ok(*address);
        }

        let address = self.chain.router_address(router_id).await?;
        if address == Address::zero() {
            warn!("Router {} is not configured on the swap helper", router_id);
            return Err(SwapError::RouterNotConfigured(router_id.to_string()));
        }

        info!("Router {} resolved to {:?}", router_id, address);
        self.resolved.lock().await.insert(router_id, address);
        Ok(address)
    }

    pub async fn forget(&self, router_id: RouterId) {
        self.resolved.lock().await.remove(&router_id);
    }

    /// Drops every cached resolution, e.g. after a network switch.
    pub async fn clear(&self) {
        self.resolved.lock().await.clear();
    }

    /// Health report of the helper deployment and every registered router.
    /// Lookup failures are reported per router rather than aborting the report.
    pub async fn diagnostics(&self) -> RouterDiagnostics {
        let chain_id = match self.chain.chain_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not read chain id: {}", e);
                None
            }
        };
        let swap_helper = self.chain.spender();
        let swap_helper_deployed = match self.chain.is_contract(swap_helper).await {
            Ok(deployed) => Some(deployed),
            Err(e) => {
                warn!("Could not read swap helper code: {}", e);
                None
            }
        };

        let mut routers = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let router_id = match RouterId::from_name(name) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping invalid router name {}: {}", name, e);
                    continue;
                }
            };
            self.forget(router_id).await;
            let status = match self.resolve(router_id).await {
                Ok(address) => RouterStatus::Configured { address },
                Err(SwapError::RouterNotConfigured(_)) => RouterStatus::NotConfigured,
                Err(e) => RouterStatus::Unreachable {
                    reason: e.to_string(),
                },
            };
            routers.push(RouterCheck {
                name: name.clone(),
                router_id,
                status,
            });
        }

        RouterDiagnostics {
            chain_id,
            swap_helper,
            swap_helper_deployed,
            routers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;

    fn id(name: &str) -> RouterId {
        RouterId::from_name(name).unwrap()
    }

    #[tokio::test]
    async fn zero_address_means_not_configured() {
        let chain = Arc::new(MockChain::new());
        let registry = RouterRegistry::new(chain, vec![UNISWAP_V2.to_string()]);

        assert!(matches!(
            registry.resolve(id(UNISWAP_V2)).await,
            Err(SwapError::RouterNotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn resolution_is_cached() {
        let chain = Arc::new(MockChain::new());
        let router = Address::from_low_u64_be(0xabc);
        chain.set_router(id(UNISWAP_V2), router);
        let registry = RouterRegistry::new(chain.clone(), vec![UNISWAP_V2.to_string()]);

        assert_eq!(registry.resolve(id(UNISWAP_V2)).await.unwrap(), router);
        chain.set_router(id(UNISWAP_V2), Address::zero());
        assert_eq!(registry.resolve(id(UNISWAP_V2)).await.unwrap(), router);
        assert_eq!(chain.router_lookups(), 1);

        registry.forget(id(UNISWAP_V2)).await;
        assert!(registry.resolve(id(UNISWAP_V2)).await.is_err());
    }

    #[tokio::test]
    async fn diagnostics_report_each_router() {
        let chain = Arc::new(MockChain::new());
        chain.set_router(id(UNISWAP_V2), Address::from_low_u64_be(0xabc));
        chain.fail_router_lookup(id(SUSHISWAP));
        let names = KNOWN_ROUTERS.iter().map(|n| (*n).to_string()).collect();
        let registry = RouterRegistry::new(chain, names);

        let report = registry.diagnostics().await;
        assert_eq!(report.chain_id, Some(39));
        assert_eq!(report.swap_helper_deployed, Some(true));
        assert_eq!(report.routers.len(), 3);
        assert_eq!(
            report.routers[0].status,
            RouterStatus::Configured {
                address: Address::from_low_u64_be(0xabc)
            }
        );
        assert_eq!(report.routers[1].status, RouterStatus::NotConfigured);
        assert!(matches!(report.routers[2].status, RouterStatus::Unreachable { .. }));
    }
}
