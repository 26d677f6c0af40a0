/*
 * Swap flow states, one tagged value per active intent
 */

use ethers::types::H256;
use serde::Serialize;
use crate::models::{Allowance, Quote, SwapIntent, SwapReceipt};
use crate::quote::QuoteTicket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SettleOutcome {
    Success { receipt: SwapReceipt },
    Reverted { receipt: SwapReceipt },
    /// Rejected by the wallet or lost in transport before a receipt existed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SwapState {
    Idle,
    QuotePending {
        intent: SwapIntent,
        ticket: QuoteTicket,
    },
    QuoteReady {
        intent: SwapIntent,
        quote: Quote,
    },
    ApprovalRequired {
        intent: SwapIntent,
        quote: Quote,
        allowance: Allowance,
    },
    Approving {
        intent: SwapIntent,
        quote: Quote,
    },
    ReadyToSwap {
        intent: SwapIntent,
        quote: Quote,
    },
    Submitting {
        intent: SwapIntent,
        quote: Quote,
    },
    Confirming {
        intent: SwapIntent,
        quote: Quote,
        tx_hash: H256,
    },
    Settled {
        intent: SwapIntent,
        outcome: SettleOutcome,
    },
}

impl SwapState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::QuotePending { .. } => "QuotePending",
            Self::QuoteReady { .. } => "QuoteReady",
            Self::ApprovalRequired { .. } => "ApprovalRequired",
            Self::Approving { .. } => "Approving",
            Self::ReadyToSwap { .. } => "ReadyToSwap",
            Self::Submitting { .. } => "Submitting",
            Self::Confirming { .. } => "Confirming",
            Self::Settled { .. } => "Settled",
        }
    }

    #[must_use]
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            Self::QuoteReady { quote, .. }
            | Self::ApprovalRequired { quote, .. }
            | Self::Approving { quote, .. }
            | Self::ReadyToSwap { quote, .. }
            | Self::Submitting { quote, .. }
            | Self::Confirming { quote, .. } => Some(quote),
            _ => None,
        }
    }

    /// States in which a transaction is being signed or mined.
    #[must_use]
    pub fn is_transacting(&self) -> bool {
        matches!(
            self,
            Self::Approving { .. } | Self::Submitting { .. } | Self::Confirming { .. }
        )
    }

    /// States whose quote still needs (or may need) an allowance verdict.
    pub(crate) fn awaiting_allowance(&self) -> Option<(&SwapIntent, &Quote)> {
        match self {
            Self::QuoteReady { intent, quote }
            | Self::ApprovalRequired { intent, quote, .. }
            | Self::ReadyToSwap { intent, quote } => Some((intent, quote)),
            _ => None,
        }
    }
}
