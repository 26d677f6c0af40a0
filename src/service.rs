/*
 * Swap service: wires the chain, pricing and orchestration components
 */

use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use crate::{
    allowance::AllowanceGate,
    balance::BalanceTracker,
    chain::{ChainClient, EthersWallet, EvmChainClient},
    config::Config,
    metrics::SwapMetrics,
    models::{Result, Route, SwapError, SwapIntent, Token},
    orchestrator::SwapOrchestrator,
    quote::{OnChainRoutePricer, QuoteEngine, RoutePricer},
    router::{RouterDiagnostics, RouterRegistry, KNOWN_ROUTERS},
    tokens::TokenRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    pub token: Token,
    pub balance: Decimal,
}

pub struct SwapService {
    config: Config,
    chain: Arc<dyn ChainClient>,
    tokens: TokenRegistry,
    routers: Arc<RouterRegistry>,
    balances: Arc<BalanceTracker>,
    orchestrator: Arc<SwapOrchestrator>,
    metrics: Arc<SwapMetrics>,
}

impl SwapService {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing swap service on {}", config.chain.name);

        let wallet = Arc::new(
            EthersWallet::connect(
                &config.chain.rpc_url,
                config.chain.chain_id,
                Duration::from_millis(config.wallet.confirmation_poll_ms),
            )
            .await?,
        );
        info!("Connected to RPC {}", config.chain.rpc_url);

        if let Some(private_key) = &config.wallet.private_key {
            wallet.connect_signer(private_key)?;
        } else {
            warn!("WALLET_PRIVATE_KEY not set, running read-only");
        }

        let chain: Arc<dyn ChainClient> = Arc::new(EvmChainClient::new(wallet, config.chain.swap_helper));

        let tokens = match &config.tokens.list_url {
            Some(url) => match TokenRegistry::fetch(&reqwest::Client::new(), url, config.chain.chain_id).await {
                Ok(registry) => registry,
                Err(e) => {
                    warn!("Token list unavailable, using built-in tokens: {}", e);
                    TokenRegistry::builtin(config.chain.chain_id)?
                }
            },
            None => TokenRegistry::builtin(config.chain.chain_id)?,
        };
        info!("{} tokens available", tokens.tokens().len());

        let routers = Arc::new(RouterRegistry::new(chain.clone(), router_names(&config)));
        let routes = config
            .pricing
            .routers
            .iter()
            .map(|name| Route::v2(name))
            .collect::<Result<Vec<_>>>()?;
        let pricer = Arc::new(OnChainRoutePricer::new(
            chain.clone(),
            routers.clone(),
            routes,
            config.chain.wrapped_native,
        ));

        let service = Self::from_parts(config, chain, tokens, routers, pricer)?;
        service.orchestrator.spawn_wallet_listener();
        info!("Swap service ready");
        Ok(service)
    }

    /// Assembles the service around an existing chain client and pricer.
    pub fn from_parts(
        config: Config,
        chain: Arc<dyn ChainClient>,
        tokens: TokenRegistry,
        routers: Arc<RouterRegistry>,
        pricer: Arc<dyn RoutePricer>,
    ) -> Result<Self> {
        let metrics = Arc::new(SwapMetrics::new()?);
        let quotes = Arc::new(QuoteEngine::new(pricer, config.swap.quote_debounce(), metrics.clone()));
        let allowances = Arc::new(AllowanceGate::new(
            chain.clone(),
            config.swap.approval_recheck_attempts,
            config.swap.approval_recheck_interval(),
            metrics.clone(),
        ));
        let balances = Arc::new(BalanceTracker::new(chain.clone()));
        let orchestrator = Arc::new(SwapOrchestrator::new(
            chain.clone(),
            quotes,
            allowances,
            balances.clone(),
            routers.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            chain,
            tokens,
            routers,
            balances,
            orchestrator,
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<SwapOrchestrator> {
        self.orchestrator.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> &SwapMetrics {
        &self.metrics
    }

    pub async fn account(&self) -> Option<Address> {
        self.chain.account().await
    }

    pub async fn diagnostics(&self) -> RouterDiagnostics {
        self.routers.diagnostics().await
    }

    /// Resolves symbols or addresses into an intent, filling in the
    /// configured slippage and deadline defaults.
    pub fn build_intent(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: &str,
        slippage_bps: Option<u16>,
        deadline_minutes: Option<u32>,
    ) -> Result<SwapIntent> {
        let intent = SwapIntent {
            token_in: self.tokens.resolve(token_in)?,
            token_out: self.tokens.resolve(token_out)?,
            amount_in: amount_in.trim().to_string(),
            slippage_bps: slippage_bps.unwrap_or(self.config.swap.default_slippage_bps),
            deadline_minutes: deadline_minutes.unwrap_or(self.config.swap.default_deadline_minutes),
        };
        intent.validate_settings()?;
        Ok(intent)
    }

    /// Balances of every listed token for the connected account. Tokens whose
    /// read fails are reported as zero.
    pub async fn token_balances(&self) -> Result<Vec<TokenBalance>> {
        let owner = self.account().await.ok_or(SwapError::WalletNotConnected)?;
        let mut balances = Vec::with_capacity(self.tokens.tokens().len());
        for token in self.tokens.tokens() {
            let balance = self.balances.refresh(token, owner).await;
            balances.push(TokenBalance {
                token: token.clone(),
                balance,
            });
        }
        Ok(balances)
    }
}

fn router_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = KNOWN_ROUTERS.iter().map(|name| (*name).to_string()).collect();
    for name in &config.pricing.routers {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}
