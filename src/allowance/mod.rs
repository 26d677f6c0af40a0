/*
 * Allowance gate: decides whether the swap helper may spend the input
 * token and drives the approve sub-flow
 */

use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use crate::chain::{ChainClient, TxStatus};
use crate::metrics::SwapMetrics;
use crate::models::{Allowance, Result, SwapError, Token};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AllowanceState {
    Unknown,
    /// Native currency is sent as value and never needs approval.
    NotRequired,
    Checked { sufficient: bool, allowance: Allowance },
    Approving { amount: U256 },
    Approved { amount: U256 },
    ApprovalFailed { reason: String },
}

pub struct AllowanceGate {
    chain: Arc<dyn ChainClient>,
    state: Mutex<AllowanceState>,
    recheck_attempts: u32,
    recheck_interval: Duration,
    metrics: Arc<SwapMetrics>,
}

impl AllowanceGate {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        recheck_attempts: u32,
        recheck_interval: Duration,
        metrics: Arc<SwapMetrics>,
    ) -> Self {
        Self {
            chain,
            state: Mutex::new(AllowanceState::Unknown),
            recheck_attempts: recheck_attempts.max(1),
            recheck_interval,
            metrics,
        }
    }

    #[must_use]
    pub fn state(&self) -> AllowanceState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn recheck_interval(&self) -> Duration {
        self.recheck_interval
    }

    pub fn reset(&self) {
        self.set_state(AllowanceState::Unknown);
    }

    fn set_state(&self, next: AllowanceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn read(&self, token: &Token, owner: Address) -> Result<Allowance> {
        let spender = self.chain.spender();
        let amount = self.chain.allowance(token, owner, spender).await?;
        Ok(Allowance {
            owner,
            spender,
            token: token.address,
            amount,
        })
    }

    /// Reads the current allowance and records whether it covers `amount`.
    pub async fn check(&self, token: &Token, owner: Address, amount: U256) -> Result<AllowanceState> {
        if token.is_native() {
            self.set_state(AllowanceState::NotRequired);
            return Ok(AllowanceState::NotRequired);
        }

        let state = match self.read(token, owner).await {
            Ok(allowance) => AllowanceState::Checked {
                sufficient: allowance.covers(amount),
                allowance,
            },
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.set_state(state.clone());
        Ok(state)
    }

    pub async fn needs_approval(&self, token: &Token, owner: Address, amount: U256) -> Result<bool> {
        let state = self.check(token, owner, amount).await?;
        Ok(matches!(state, AllowanceState::Checked { sufficient: false, .. }))
    }

    /// Approves exactly `amount`, waits for the transaction, then re-reads the
    /// allowance until the chain reflects it. Success is only reported once
    /// that re-check passes.
    pub async fn approve(&self, token: &Token, owner: Address, amount: U256) -> Result<Allowance> {
        if token.is_native() {
            return Err(SwapError::InvalidState(format!(
                "{} is native and needs no approval",
                token.symbol
            )));
        }

        self.set_state(AllowanceState::Approving { amount });
        let spender = self.chain.spender();

        let tx_hash = match self.chain.approve(token, spender, amount).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.fail("rejected", approval_rejected(e))),
        };

        let outcome = match self.chain.wait_for_confirmation(tx_hash).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail("failed", e)),
        };
        if outcome.status == TxStatus::Reverted {
            return Err(self.fail("reverted", SwapError::ApprovalReverted(format!("{tx_hash:?}"))));
        }

        info!(
            "Approval {:?} confirmed in block {:?} for {} {}",
            tx_hash, outcome.block_number, amount, token.symbol
        );
        self.set_state(AllowanceState::Approved { amount });
        self.metrics.record_approval("confirmed");

        let mut last = Err(SwapError::NetworkError("allowance not re-checked".to_string()));
        for attempt in 1..=self.recheck_attempts {
            last = self.read(token, owner).await;
            match &last {
                Ok(allowance) if allowance.covers(amount) => break,
                Ok(allowance) => warn!(
                    "Allowance re-check {}/{}: {} < {}",
                    attempt, self.recheck_attempts, allowance.amount, amount
                ),
                Err(e) => warn!("Allowance re-check {}/{} failed: {}", attempt, self.recheck_attempts, e),
            }
            if attempt < self.recheck_attempts {
                tokio::time::sleep(self.recheck_interval).await;
            }
        }

        let allowance = last?;
        let sufficient = allowance.covers(amount);
        self.set_state(AllowanceState::Checked {
            sufficient,
            allowance: allowance.clone(),
        });
        if !sufficient {
            return Err(SwapError::AllowanceInsufficient {
                required: amount,
                approved: allowance.amount,
            });
        }
        Ok(allowance)
    }

    fn fail(&self, outcome: &str, error: SwapError) -> SwapError {
        warn!("Approval {}: {}", outcome, error);
        self.metrics.record_approval(outcome);
        self.set_state(AllowanceState::ApprovalFailed {
            reason: error.to_string(),
        });
        error
    }
}

fn approval_rejected(error: SwapError) -> SwapError {
    match error {
        SwapError::TransactionRejected(reason) => SwapError::ApprovalRejected(reason),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{token, MockChain, TxBehavior};

    fn owner() -> Address {
        Address::from_low_u64_be(0xcafe)
    }

    fn gate(chain: Arc<MockChain>, attempts: u32) -> AllowanceGate {
        AllowanceGate::new(chain, attempts, Duration::ZERO, Arc::new(SwapMetrics::new().unwrap()))
    }

    fn connected_chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        chain.set_account(Some(owner()));
        chain
    }

    #[tokio::test]
    async fn native_token_never_needs_approval() {
        let chain = connected_chain();
        let native = token(0, "U2U", 18);
        let gate = gate(chain.clone(), 1);

        for allowance in [U256::zero(), U256::one(), U256::MAX] {
            chain.set_allowance(&native, owner(), allowance);
            assert!(!gate.needs_approval(&native, owner(), U256::exp10(30)).await.unwrap());
        }
        assert_eq!(gate.state(), AllowanceState::NotRequired);
        assert!(gate.approve(&native, owner(), U256::one()).await.is_err());
        assert_eq!(chain.allowance_reads(), 0);
        assert!(chain.approvals().is_empty());
    }

    #[tokio::test]
    async fn approval_needed_when_allowance_below_amount() {
        let chain = connected_chain();
        let usdc = token(5, "USDC", 6);
        chain.set_allowance(&usdc, owner(), U256::from(100u64));
        let gate = gate(chain.clone(), 1);

        assert!(gate.needs_approval(&usdc, owner(), U256::from(150u64)).await.unwrap());
        assert!(!gate.needs_approval(&usdc, owner(), U256::from(100u64)).await.unwrap());
    }

    #[tokio::test]
    async fn approve_exact_amount_then_recheck() {
        let chain = connected_chain();
        let usdc = token(5, "USDC", 6);
        chain.set_allowance(&usdc, owner(), U256::from(100u64));
        let gate = gate(chain.clone(), 1);

        let allowance = gate.approve(&usdc, owner(), U256::from(150u64)).await.unwrap();
        assert!(allowance.amount >= U256::from(150u64));
        assert_eq!(chain.approvals(), vec![(usdc.address, U256::from(150u64))]);
        assert_eq!(chain.allowance_reads(), 1);
        assert!(matches!(gate.state(), AllowanceState::Checked { sufficient: true, .. }));
    }

    #[tokio::test]
    async fn confirmed_approval_is_not_trusted_without_chain_state() {
        let chain = connected_chain();
        let usdc = token(5, "USDC", 6);
        chain.set_allowance(&usdc, owner(), U256::from(100u64));
        chain.approve_behavior(TxBehavior::ConfirmWithoutEffect);
        let gate = gate(chain.clone(), 3);

        let result = gate.approve(&usdc, owner(), U256::from(150u64)).await;
        assert!(matches!(result, Err(SwapError::AllowanceInsufficient { .. })));
        assert_eq!(chain.allowance_reads(), 3);
        assert!(matches!(gate.state(), AllowanceState::Checked { sufficient: false, .. }));
    }

    #[tokio::test]
    async fn rejected_and_reverted_approvals_are_distinguished() {
        let chain = connected_chain();
        let usdc = token(5, "USDC", 6);
        let gate = gate(chain.clone(), 1);

        chain.approve_behavior(TxBehavior::Reject);
        assert!(matches!(
            gate.approve(&usdc, owner(), U256::one()).await,
            Err(SwapError::ApprovalRejected(_))
        ));
        assert!(matches!(gate.state(), AllowanceState::ApprovalFailed { .. }));

        chain.approve_behavior(TxBehavior::Revert);
        assert!(matches!(
            gate.approve(&usdc, owner(), U256::one()).await,
            Err(SwapError::ApprovalReverted(_))
        ));
    }

    #[tokio::test]
    async fn read_failure_leaves_state_unknown() {
        let chain = connected_chain();
        let usdc = token(5, "USDC", 6);
        chain.fail_reads(true);
        let gate = gate(chain, 1);

        assert!(matches!(
            gate.needs_approval(&usdc, owner(), U256::one()).await,
            Err(SwapError::NetworkError(_))
        ));
        assert_eq!(gate.state(), AllowanceState::Unknown);
    }
}
