/*
 * Configuration management for the swap service
 */

use crate::models::{Result, SwapError, MAX_SLIPPAGE_BPS};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHAIN_ID: u64 = 39;
pub const DEFAULT_SWAP_HELPER: &str = "0x92e9cc05b7935a4bea5669546e3f49df0c9853be";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPreset {
    pub id: u64,
    pub name: &'static str,
    pub rpc_url: &'static str,
    pub explorer_url: &'static str,
}

pub const CHAIN_PRESETS: [ChainPreset; 2] = [
    ChainPreset {
        id: 39,
        name: "U2U Network",
        rpc_url: "https://rpc-mainnet.uniultra.xyz",
        explorer_url: "https://u2uscan.xyz",
    },
    ChainPreset {
        id: 2484,
        name: "U2U Solaris Testnet",
        rpc_url: "https://rpc-nebulas-testnet.uniultra.xyz",
        explorer_url: "https://testnet.u2uscan.xyz",
    },
];

impl ChainPreset {
    #[must_use]
    pub fn for_id(id: u64) -> Option<&'static ChainPreset> {
        CHAIN_PRESETS.iter().find(|preset| preset.id == id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub swap: SwapConfig,
    pub tokens: TokenListConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub swap_helper: Address,
    pub wrapped_native: Option<Address>,
}

impl ChainConfig {
    #[must_use]
    pub fn explorer_tx_url(&self, tx_hash: H256) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{:?}", base.trim_end_matches('/'), tx_hash))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    /// Without a key the service runs read-only: quotes and balances work,
    /// approvals and swaps fail with `WalletNotConnected`.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub confirmation_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapConfig {
    pub default_slippage_bps: u16,
    pub default_deadline_minutes: u32,
    pub quote_debounce_ms: u64,
    pub approval_recheck_attempts: u32,
    pub approval_recheck_interval_ms: u64,
}

impl SwapConfig {
    #[must_use]
    pub fn quote_debounce(&self) -> Duration {
        Duration::from_millis(self.quote_debounce_ms)
    }

    #[must_use]
    pub fn approval_recheck_interval(&self) -> Duration {
        Duration::from_millis(self.approval_recheck_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenListConfig {
    pub list_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    /// V2-style routers asked for `getAmountsOut`, in preference order.
    pub routers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let chain_id: u64 = parse_or(var("CHAIN_ID"), "CHAIN_ID", DEFAULT_CHAIN_ID)?;
        let preset = ChainPreset::for_id(chain_id);
        let rpc_url = var("RPC_URL")
            .or_else(|| preset.map(|p| p.rpc_url.to_string()))
            .ok_or_else(|| SwapError::ConfigError(format!("RPC_URL not set and chain {chain_id} has no preset")))?;

        let swap_helper = crate::utils::parse_address(
            &var("SWAP_HELPER_ADDRESS").unwrap_or_else(|| DEFAULT_SWAP_HELPER.to_string()),
        )?;
        let wrapped_native = var("WRAPPED_NATIVE_ADDRESS")
            .map(|address| crate::utils::parse_address(&address))
            .transpose()?;

        let swap = SwapConfig {
            default_slippage_bps: parse_or(var("DEFAULT_SLIPPAGE_BPS"), "DEFAULT_SLIPPAGE_BPS", 50)?,
            default_deadline_minutes: parse_or(var("DEFAULT_DEADLINE_MINUTES"), "DEFAULT_DEADLINE_MINUTES", 20)?,
            quote_debounce_ms: parse_or(var("QUOTE_DEBOUNCE_MS"), "QUOTE_DEBOUNCE_MS", 500)?,
            approval_recheck_attempts: parse_or(var("APPROVAL_RECHECK_ATTEMPTS"), "APPROVAL_RECHECK_ATTEMPTS", 3)?,
            approval_recheck_interval_ms: parse_or(
                var("APPROVAL_RECHECK_INTERVAL_MS"),
                "APPROVAL_RECHECK_INTERVAL_MS",
                1000,
            )?,
        };
        if swap.default_slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(SwapError::ConfigError(format!(
                "DEFAULT_SLIPPAGE_BPS must be at most {MAX_SLIPPAGE_BPS}"
            )));
        }
        if swap.default_deadline_minutes == 0 {
            return Err(SwapError::ConfigError(
                "DEFAULT_DEADLINE_MINUTES must be positive".to_string(),
            ));
        }

        let routers = var("PRICING_ROUTERS")
            .unwrap_or_else(|| "UniswapV2,Sushiswap".to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(var("SERVER_PORT"), "SERVER_PORT", 8080)?,
                log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
            chain: ChainConfig {
                chain_id,
                name: preset.map_or_else(|| format!("Chain {chain_id}"), |p| p.name.to_string()),
                rpc_url,
                explorer_url: var("EXPLORER_URL").or_else(|| preset.map(|p| p.explorer_url.to_string())),
                swap_helper,
                wrapped_native,
            },
            wallet: WalletConfig {
                private_key: var("WALLET_PRIVATE_KEY"),
                confirmation_poll_ms: parse_or(var("CONFIRMATION_POLL_MS"), "CONFIRMATION_POLL_MS", 2000)?,
            },
            swap,
            tokens: TokenListConfig {
                list_url: var("TOKEN_LIST_URL"),
            },
            pricing: PricingConfig { routers },
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SwapError::ConfigError(format!("Invalid {key}: {e}"))),
        None => Ok(default),
    }
}
