/*
 * Route pricer that asks each configured V2-style router for getAmountsOut
 */

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};
use crate::chain::ChainClient;
use crate::models::{Result, Route, RouteKind, SwapError, Token, BPS_DENOMINATOR};
use crate::quote::{RouteCandidate, RoutePricer};
use crate::router::RouterRegistry;

// Reference trade used to estimate the spot rate: 1/1000 of the requested size.
const REFERENCE_DIVISOR: u64 = 1000;

pub struct OnChainRoutePricer {
    chain: Arc<dyn ChainClient>,
    routers: Arc<RouterRegistry>,
    routes: Vec<Route>,
    wrapped_native: Option<Address>,
}

impl OnChainRoutePricer {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        routers: Arc<RouterRegistry>,
        routes: Vec<Route>,
        wrapped_native: Option<Address>,
    ) -> Self {
        Self {
            chain,
            routers,
            routes,
            wrapped_native,
        }
    }

    /// V2 routers price native currency through its wrapped token.
    fn routable(&self, token: &Token) -> Result<Address> {
        if !token.is_native() {
            return Ok(token.address);
        }
        self.wrapped_native.ok_or_else(|| {
            SwapError::QuoteUnavailable(format!(
                "no wrapped token configured to price native {}",
                token.symbol
            ))
        })
    }

    async fn price_route(&self, route: &Route, amount_in: U256, path: &[Address]) -> Result<RouteCandidate> {
        let router = self.routers.resolve(route.router_id).await?;
        let amounts = self.chain.amounts_out(router, amount_in, path).await?;
        let amount_out = amounts
            .last()
            .copied()
            .ok_or_else(|| SwapError::ContractError("getAmountsOut returned no amounts".to_string()))?;

        let reference_in = (amount_in / REFERENCE_DIVISOR).max(U256::one());
        let price_impact_bps = match self.chain.amounts_out(router, reference_in, path).await {
            Ok(reference) => reference
                .last()
                .map_or(0, |reference_out| price_impact_bps(amount_in, amount_out, reference_in, *reference_out)),
            Err(e) => {
                debug!("Reference quote on {} failed: {}", route.router_id, e);
                0
            }
        };

        Ok(RouteCandidate {
            route: route.clone(),
            amount_out,
            price_impact_bps,
        })
    }
}

#[async_trait]
impl RoutePricer for OnChainRoutePricer {
    async fn price(&self, token_in: &Token, token_out: &Token, amount_in: U256) -> Result<Vec<RouteCandidate>> {
        let path = [self.routable(token_in)?, self.routable(token_out)?];

        let mut candidates = Vec::new();
        for route in &self.routes {
            if route.kind != RouteKind::V2 {
                debug!("Skipping {}: only V2 routers expose getAmountsOut", route.router_id);
                continue;
            }
            match self.price_route(route, amount_in, &path).await {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => warn!("Route {} could not price {} -> {}: {}", route.router_id, token_in.symbol, token_out.symbol, e),
            }
        }

        if candidates.is_empty() {
            return Err(SwapError::QuoteUnavailable(format!(
                "no configured route priced {} -> {}",
                token_in.symbol, token_out.symbol
            )));
        }
        Ok(candidates)
    }
}

/// Shortfall of the actual output against the reference rate, in bps.
#[must_use]
pub fn price_impact_bps(amount_in: U256, amount_out: U256, reference_in: U256, reference_out: U256) -> u32 {
    if reference_in.is_zero() {
        return 0;
    }
    let expected = match reference_out.checked_mul(amount_in) {
        Some(scaled) => scaled / reference_in,
        None => return 0,
    };
    if expected.is_zero() || expected <= amount_out {
        return 0;
    }
    let shortfall = (expected - amount_out).saturating_mul(U256::from(BPS_DENOMINATOR)) / expected;
    shortfall.min(U256::from(BPS_DENOMINATOR)).as_u32()
}
