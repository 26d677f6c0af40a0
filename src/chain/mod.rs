/*
 * Chain gateway: typed reads and writes against ERC20 tokens, V2 routers
 * and the swap helper contract
 */

pub mod calldata;
pub mod session;

use async_trait::async_trait;
use ethers::types::{Address, TransactionRequest, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use crate::models::{Result, RouteKind, RouterId, SwapError, Token, WalletEvent};

pub use session::{EthersWallet, WalletSession};

/// Parameters of one swap-helper call; amounts are in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapCall {
    pub router_id: RouterId,
    pub kind: RouteKind,
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub path: Vec<Address>,
    pub deadline: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxStatus {
    Confirmed,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub amount_out: Option<U256>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn account(&self) -> Option<Address>;
    async fn chain_id(&self) -> Result<u64>;
    /// The swap helper, which is the spender for every approval.
    fn spender(&self) -> Address;
    async fn balance_of(&self, token: &Token, owner: Address) -> Result<U256>;
    async fn allowance(&self, token: &Token, owner: Address, spender: Address) -> Result<U256>;
    async fn approve(&self, token: &Token, spender: Address, amount: U256) -> Result<H256>;
    async fn router_address(&self, router_id: RouterId) -> Result<Address>;
    async fn amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<Vec<U256>>;
    async fn execute_swap(&self, call: &SwapCall) -> Result<H256>;
    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<TxOutcome>;
    async fn is_contract(&self, address: Address) -> Result<bool>;
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

pub struct EvmChainClient {
    session: Arc<dyn WalletSession>,
    swap_helper: Address,
}

impl EvmChainClient {
    #[must_use]
    pub fn new(session: Arc<dyn WalletSession>, swap_helper: Address) -> Self {
        Self {
            session,
            swap_helper,
        }
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn account(&self) -> Option<Address> {
        self.session.account()
    }

    async fn chain_id(&self) -> Result<u64> {
        self.session.chain_id().await
    }

    fn spender(&self) -> Address {
        self.swap_helper
    }

    async fn balance_of(&self, token: &Token, owner: Address) -> Result<U256> {
        if token.is_native() {
            return self.session.native_balance(owner).await;
        }
        let result = self.session.call(token.address, calldata::balance_of(owner)).await?;
        calldata::decode_uint(&result)
    }

    async fn allowance(&self, token: &Token, owner: Address, spender: Address) -> Result<U256> {
        if token.is_native() {
            return Ok(U256::MAX);
        }
        let result = self
            .session
            .call(token.address, calldata::allowance(owner, spender))
            .await?;
        calldata::decode_uint(&result)
    }

    async fn approve(&self, token: &Token, spender: Address, amount: U256) -> Result<H256> {
        if token.is_native() {
            return Err(SwapError::InvalidState(format!(
                "{} is native and cannot be approved",
                token.symbol
            )));
        }
        info!("Approving {} {} for {:?}", amount, token.symbol, spender);
        let tx = TransactionRequest::new()
            .to(token.address)
            .data(calldata::approve(spender, amount));
        self.session.sign_and_send(tx).await
    }

    async fn router_address(&self, router_id: RouterId) -> Result<Address> {
        let result = self
            .session
            .call(self.swap_helper, calldata::routers(router_id))
            .await?;
        calldata::decode_address(&result)
    }

    async fn amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<Vec<U256>> {
        let result = self
            .session
            .call(router, calldata::get_amounts_out(amount_in, path))
            .await?;
        calldata::decode_uint_array(&result)
    }

    async fn execute_swap(&self, call: &SwapCall) -> Result<H256> {
        let data = match call.kind {
            RouteKind::V2 => calldata::execute_swap_v2(
                call.router_id,
                call.amount_in,
                call.amount_out_min,
                &call.path,
                call.deadline,
            ),
            RouteKind::V3 { fee } => {
                let (token_in, token_out) = match call.path.as_slice() {
                    [token_in, token_out] => (*token_in, *token_out),
                    _ => {
                        return Err(SwapError::ContractError(format!(
                            "V3 single-hop swap needs a two-token path, got {}",
                            call.path.len()
                        )))
                    }
                };
                calldata::execute_swap_v3_exact_input_single(
                    call.router_id,
                    token_in,
                    token_out,
                    fee,
                    call.amount_in,
                    call.amount_out_min,
                    call.deadline,
                    U256::zero(),
                )
            }
        };

        let mut tx = TransactionRequest::new().to(self.swap_helper).data(data);
        if call.path.first() == Some(&Address::zero()) {
            tx = tx.value(call.amount_in);
        }
        debug!("Submitting swap via {}: {:?}", call.router_id, call);
        self.session.sign_and_send(tx).await
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<TxOutcome> {
        let receipt = self.session.wait_for_confirmation(tx_hash).await?;
        let status = if receipt.status.map(|s| s.as_u64()) == Some(1) {
            TxStatus::Confirmed
        } else {
            TxStatus::Reverted
        };
        Ok(TxOutcome {
            tx_hash,
            status,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            amount_out: calldata::executed_amount_out(&receipt.logs, self.swap_helper),
        })
    }

    async fn is_contract(&self, address: Address) -> Result<bool> {
        let code = self.session.code_at(address).await?;
        Ok(!code.is_empty())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.session.subscribe()
    }
}
