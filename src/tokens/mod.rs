/*
 * Token registry: the catalog of tradable tokens for the connected chain
 */

use ethers::types::Address;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};
use crate::models::{Result, SwapError, Token};

pub const NATIVE_SENTINEL: &str = "0x0000000000000000000000000000000000000000";

/// Built-in list: (address, symbol, name, decimals).
const DEFAULT_TOKENS: [(&str, &str, &str, u8); 6] = [
    (NATIVE_SENTINEL, "U2U", "U2U Native Token", 18),
    ("0xB4FBF271143F4FBf7B91A5ded31805e42b2208d6", "WETH", "Wrapped Ether", 18),
    ("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", "UNI", "Uniswap", 18),
    ("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI", "Dai Stablecoin", 18),
    ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", "USD Coin", 6),
    ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT", "Tether USD", 6),
];

#[derive(Debug, Deserialize)]
struct TokenList {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone)]
pub struct TokenRegistry {
    chain_id: u64,
    tokens: Vec<Token>,
}

impl TokenRegistry {
    pub fn builtin(chain_id: u64) -> Result<Self> {
        let tokens = DEFAULT_TOKENS
            .iter()
            .map(|(address, symbol, name, decimals)| {
                Ok(Token {
                    address: crate::utils::parse_address(address)?,
                    symbol: (*symbol).to_string(),
                    name: (*name).to_string(),
                    decimals: *decimals,
                    chain_id,
                    logo_uri: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chain_id, tokens })
    }

    /// Builds a registry from tokens, keeping only those on `chain_id` and
    /// dropping later duplicates of an address or symbol.
    #[must_use]
    pub fn from_tokens(chain_id: u64, tokens: Vec<Token>) -> Self {
        let mut kept: Vec<Token> = Vec::with_capacity(tokens.len());
        for token in tokens.into_iter().filter(|t| t.chain_id == chain_id) {
            let duplicate = kept.iter().any(|k| {
                k.address == token.address || k.symbol.eq_ignore_ascii_case(&token.symbol)
            });
            if duplicate {
                warn!("Skipping duplicate token {}", token);
                continue;
            }
            kept.push(token);
        }
        Self {
            chain_id,
            tokens: kept,
        }
    }

    /// Fetches a token list in the common `{ "tokens": [...] }` JSON format.
    /// The native token is always present even if the list omits it.
    pub async fn fetch(client: &Client, url: &str, chain_id: u64) -> Result<Self> {
        let list = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<TokenList>()
            .await?;

        let mut tokens = Self::builtin(chain_id)?
            .tokens
            .into_iter()
            .filter(Token::is_native)
            .collect::<Vec<_>>();
        tokens.extend(list.tokens);

        let registry = Self::from_tokens(chain_id, tokens);
        info!("Loaded {} tokens from {}", registry.tokens.len(), url);
        Ok(registry)
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn native(&self) -> Option<&Token> {
        self.tokens.iter().find(|t| t.is_native())
    }

    #[must_use]
    pub fn by_address(&self, address: Address) -> Option<&Token> {
        self.tokens.iter().find(|t| t.address == address)
    }

    #[must_use]
    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Looks a token up by symbol or by `0x` address.
    pub fn resolve(&self, symbol_or_address: &str) -> Result<Token> {
        let found = if symbol_or_address.starts_with("0x") {
            let address = crate::utils::parse_address(symbol_or_address)?;
            self.by_address(address)
        } else {
            self.by_symbol(symbol_or_address)
        };
        found
            .cloned()
            .ok_or_else(|| SwapError::UnknownToken(symbol_or_address.to_string()))
    }
}
