/*
 * Data models and types for the swap orchestration engine
 */

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAX_SLIPPAGE_BPS: u16 = 5000;
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub chain_id: u64,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl Token {
    /// The zero address stands in for the chain's native currency.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.address == Address::zero()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.symbol, self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: String,
    pub slippage_bps: u16,
    pub deadline_minutes: u32,
}

impl SwapIntent {
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey {
            token_in: self.token_in.address,
            token_out: self.token_out.address,
        }
    }

    pub fn validate_settings(&self) -> Result<()> {
        if self.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(SwapError::InvalidSettings(format!(
                "slippage {} bps exceeds {MAX_SLIPPAGE_BPS} bps",
                self.slippage_bps
            )));
        }
        if self.deadline_minutes == 0 {
            return Err(SwapError::InvalidSettings(
                "deadline must be at least one minute".to_string(),
            ));
        }
        Ok(())
    }
}

/// Directed token pair; quote sequence numbers are scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub token_in: Address,
    pub token_out: Address,
}

/// Logical exchange identifier understood by the swap helper's `routers` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterId(pub H256);

impl RouterId {
    /// Encodes an ASCII router name right-padded with zeros, e.g. `UniswapV2`.
    pub fn from_name(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > 32 {
            return Err(SwapError::ConfigError(format!(
                "Router name must be 1-32 bytes: {name}"
            )));
        }
        let mut raw = [0u8; 32];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(H256::from(raw)))
    }

    #[must_use]
    pub fn name(&self) -> String {
        let raw = self.0.as_bytes();
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteKind {
    V2,
    V3 { fee: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub router_id: RouterId,
    pub kind: RouteKind,
}

impl Route {
    pub fn v2(name: &str) -> Result<Self> {
        Ok(Self {
            router_id: RouterId::from_name(name)?,
            kind: RouteKind::V2,
        })
    }

    pub fn v3(name: &str, fee: u32) -> Result<Self> {
        Ok(Self {
            router_id: RouterId::from_name(name)?,
            kind: RouteKind::V3 { fee },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub amount_out_base: U256,
    pub rate: Decimal,
    pub route: Route,
    pub price_impact_bps: u32,
    pub generated_at: u64,
}

impl Quote {
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey {
            token_in: self.token_in,
            token_out: self.token_out,
        }
    }

    /// Minimum output in base units: `amount_out * (1 - bps / 10000)`, floored.
    #[must_use]
    pub fn min_received_base(&self, slippage_bps: u16) -> U256 {
        crate::utils::apply_slippage(self.amount_out_base, slippage_bps)
    }

    pub fn min_received(&self, slippage_bps: u16, decimals_out: u8) -> Result<Decimal> {
        crate::utils::from_base_units(self.min_received_base(slippage_bps), decimals_out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub owner: Address,
    pub spender: Address,
    pub token: Address,
    pub amount: U256,
}

impl Allowance {
    #[must_use]
    pub fn covers(&self, amount: U256) -> bool {
        self.amount >= amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Submitted,
    Confirmed,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub tx_hash: H256,
    pub status: ReceiptStatus,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    AccountChanged { account: Option<Address> },
    ChainChanged { chain_id: u64 },
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Input and output token are the same")]
    SamePairSelected,

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Quote is stale, a fresh quote is required")]
    QuoteStale,

    #[error("Allowance insufficient: required {required}, approved {approved}")]
    AllowanceInsufficient { required: U256, approved: U256 },

    #[error("Approval rejected: {0}")]
    ApprovalRejected(String),

    #[error("Approval reverted: {0}")]
    ApprovalReverted(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Router not configured: {0}")]
    RouterNotConfigured(String),

    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Another transaction is already in flight")]
    SubmissionInProgress,

    #[error("Operation not allowed in state {0}")]
    InvalidState(String),

    #[error("Invalid swap settings: {0}")]
    InvalidSettings(String),

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Contract interaction error: {0}")]
    ContractError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Token list error: {0}")]
    TokenListError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_id_matches_helper_encoding() {
        let id = RouterId::from_name("UniswapV2").unwrap();
        assert_eq!(
            format!("{:?}", id.0),
            "0x556e697377617056320000000000000000000000000000000000000000000000"
        );
        assert_eq!(id.name(), "UniswapV2");
        assert_eq!(id.to_string(), "UniswapV2");
    }

    #[test]
    fn router_id_rejects_oversized_names() {
        assert!(RouterId::from_name("").is_err());
        assert!(RouterId::from_name(&"x".repeat(33)).is_err());
    }

    #[test]
    fn intent_settings_are_bounded() {
        let token = |address: u64, symbol: &str| Token {
            address: Address::from_low_u64_be(address),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            chain_id: 39,
            logo_uri: None,
        };
        let mut intent = SwapIntent {
            token_in: token(1, "A"),
            token_out: token(2, "B"),
            amount_in: "1".to_string(),
            slippage_bps: 5000,
            deadline_minutes: 20,
        };
        assert!(intent.validate_settings().is_ok());

        intent.slippage_bps = 5001;
        assert!(matches!(intent.validate_settings(), Err(SwapError::InvalidSettings(_))));

        intent.slippage_bps = 50;
        intent.deadline_minutes = 0;
        assert!(matches!(intent.validate_settings(), Err(SwapError::InvalidSettings(_))));
    }
}
