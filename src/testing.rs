/*
 * In-memory chain and pricing doubles shared by the unit tests
 */

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use crate::chain::{ChainClient, SwapCall, TxOutcome, TxStatus};
use crate::models::{Result, Route, RouterId, SwapError, Token, WalletEvent};
use crate::quote::{RouteCandidate, RoutePricer};

pub fn token(id: u64, symbol: &str, decimals: u8) -> Token {
    Token {
        address: Address::from_low_u64_be(id),
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        decimals,
        chain_id: 39,
        logo_uri: None,
    }
}

pub fn candidate(router: &str, amount_out: u64, price_impact_bps: u32) -> RouteCandidate {
    RouteCandidate {
        route: Route::v2(router).unwrap(),
        amount_out: U256::from(amount_out),
        price_impact_bps,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBehavior {
    Confirm,
    /// Mined successfully but the chain state does not reflect it yet.
    ConfirmWithoutEffect,
    Reject,
    Revert,
}

#[derive(Debug, Clone)]
enum PendingTx {
    Approve { token: Address, owner: Address, amount: U256 },
    Swap,
}

#[derive(Default)]
struct ChainState {
    account: Option<Address>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address), U256>,
    routers: HashMap<RouterId, Address>,
    failing_routers: HashSet<RouterId>,
    reserves: HashMap<Address, (U256, U256)>,
    fail_reads: bool,
    approve_behavior: Option<TxBehavior>,
    swap_behavior: Option<TxBehavior>,
    swap_amount_out: Option<U256>,
    pending: HashMap<H256, (PendingTx, TxBehavior)>,
    approvals: Vec<(Address, U256)>,
    swaps: Vec<SwapCall>,
    nonce: u64,
}

pub struct MockChain {
    state: Mutex<ChainState>,
    spender: Address,
    events: broadcast::Sender<WalletEvent>,
    confirmations: Semaphore,
    hold_confirmations: Mutex<bool>,
    router_lookups: AtomicUsize,
    allowance_reads: AtomicUsize,
    balance_reads: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(ChainState::default()),
            spender: Address::from_low_u64_be(0x5a),
            events,
            confirmations: Semaphore::new(0),
            hold_confirmations: Mutex::new(false),
            router_lookups: AtomicUsize::new(0),
            allowance_reads: AtomicUsize::new(0),
            balance_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.state.lock().unwrap().account = account;
    }

    pub fn set_balance(&self, token: &Token, owner: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert((token.address, owner), amount);
    }

    pub fn set_allowance(&self, token: &Token, owner: Address, amount: U256) {
        self.state.lock().unwrap().allowances.insert((token.address, owner), amount);
    }

    pub fn set_router(&self, router_id: RouterId, address: Address) {
        self.state.lock().unwrap().routers.insert(router_id, address);
    }

    pub fn fail_router_lookup(&self, router_id: RouterId) {
        self.state.lock().unwrap().failing_routers.insert(router_id);
    }

    pub fn set_reserves(&self, router: Address, reserve_in: U256, reserve_out: U256) {
        self.state.lock().unwrap().reserves.insert(router, (reserve_in, reserve_out));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn approve_behavior(&self, behavior: TxBehavior) {
        self.state.lock().unwrap().approve_behavior = Some(behavior);
    }

    pub fn swap_behavior(&self, behavior: TxBehavior) {
        self.state.lock().unwrap().swap_behavior = Some(behavior);
    }

    pub fn swap_amount_out(&self, amount: U256) {
        self.state.lock().unwrap().swap_amount_out = Some(amount);
    }

    /// Confirmations block until `release_confirmation` is called.
    pub fn hold_confirmations(&self) {
        *self.hold_confirmations.lock().unwrap() = true;
    }

    pub fn release_confirmation(&self) {
        self.confirmations.add_permits(1);
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    pub fn approvals(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn swaps(&self) -> Vec<SwapCall> {
        self.state.lock().unwrap().swaps.clone()
    }

    pub fn router_lookups(&self) -> usize {
        self.router_lookups.load(Ordering::SeqCst)
    }

    pub fn allowance_reads(&self) -> usize {
        self.allowance_reads.load(Ordering::SeqCst)
    }

    pub fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    fn next_hash(state: &mut ChainState) -> H256 {
        state.nonce += 1;
        H256::from_low_u64_be(state.nonce)
    }

    fn read_guard(&self) -> Result<()> {
        if self.state.lock().unwrap().fail_reads {
            return Err(SwapError::NetworkError("rpc unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn account(&self) -> Option<Address> {
        self.state.lock().unwrap().account
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(39)
    }

    fn spender(&self) -> Address {
        self.spender
    }

    async fn balance_of(&self, token: &Token, owner: Address) -> Result<U256> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(&(token.address, owner)).copied().unwrap_or_default())
    }

    async fn allowance(&self, token: &Token, owner: Address, _spender: Address) -> Result<U256> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state.allowances.get(&(token.address, owner)).copied().unwrap_or_default())
    }

    async fn approve(&self, token: &Token, _spender: Address, amount: U256) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        let behavior = state.approve_behavior.unwrap_or(TxBehavior::Confirm);
        if behavior == TxBehavior::Reject {
            return Err(SwapError::TransactionRejected("user denied signature".to_string()));
        }
        let owner = state.account.ok_or(SwapError::WalletNotConnected)?;
        state.approvals.push((token.address, amount));
        let hash = Self::next_hash(&mut state);
        state.pending.insert(
            hash,
            (
                PendingTx::Approve {
                    token: token.address,
                    owner,
                    amount,
                },
                behavior,
            ),
        );
        Ok(hash)
    }

    async fn router_address(&self, router_id: RouterId) -> Result<Address> {
        self.router_lookups.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        if state.failing_routers.contains(&router_id) {
            return Err(SwapError::NetworkError("router lookup failed".to_string()));
        }
        Ok(state.routers.get(&router_id).copied().unwrap_or_default())
    }

    async fn amounts_out(&self, router: Address, amount_in: U256, _path: &[Address]) -> Result<Vec<U256>> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        let (reserve_in, reserve_out) = state
            .reserves
            .get(&router)
            .copied()
            .ok_or_else(|| SwapError::ContractError("no pool".to_string()))?;
        let amount_with_fee = amount_in * 997u64;
        let out = amount_with_fee * reserve_out / (reserve_in * 1000u64 + amount_with_fee);
        Ok(vec![amount_in, out])
    }

    async fn execute_swap(&self, call: &SwapCall) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        let behavior = state.swap_behavior.unwrap_or(TxBehavior::Confirm);
        state.swaps.push(call.clone());
        if behavior == TxBehavior::Reject {
            return Err(SwapError::TransactionRejected("user denied signature".to_string()));
        }
        let hash = Self::next_hash(&mut state);
        state.pending.insert(hash, (PendingTx::Swap, behavior));
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<TxOutcome> {
        let hold = *self.hold_confirmations.lock().unwrap();
        if hold {
            self.confirmations
                .acquire()
                .await
                .map_err(|e| SwapError::NetworkError(e.to_string()))?
                .forget();
        }

        let mut state = self.state.lock().unwrap();
        let (pending, behavior) = state
            .pending
            .remove(&tx_hash)
            .ok_or_else(|| SwapError::NetworkError("unknown transaction".to_string()))?;

        if behavior == TxBehavior::Revert {
            return Ok(TxOutcome {
                tx_hash,
                status: TxStatus::Reverted,
                block_number: Some(1),
                amount_out: None,
            });
        }

        let mut amount_out = None;
        match pending {
            PendingTx::Approve { token, owner, amount } => {
                if behavior == TxBehavior::Confirm {
                    state.allowances.insert((token, owner), amount);
                }
            }
            PendingTx::Swap => amount_out = state.swap_amount_out,
        }
        Ok(TxOutcome {
            tx_hash,
            status: TxStatus::Confirmed,
            block_number: Some(1),
            amount_out,
        })
    }

    async fn is_contract(&self, _address: Address) -> Result<bool> {
        self.read_guard()?;
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

type PricerReply = oneshot::Sender<Result<Vec<RouteCandidate>>>;

enum Pricing {
    Rate(u64, u64),
    Amount(U256),
    Candidates(Vec<RouteCandidate>),
    Failing,
}

/// Answers synchronously from a fixed rule.
pub struct FixedPricer {
    pricing: Pricing,
    calls: AtomicUsize,
}

impl FixedPricer {
    pub fn rate(numerator: u64, denominator: u64) -> Self {
        Self::with(Pricing::Rate(numerator, denominator))
    }

    pub fn amount(amount_out: U256) -> Self {
        Self::with(Pricing::Amount(amount_out))
    }

    pub fn candidates(candidates: Vec<RouteCandidate>) -> Self {
        Self::with(Pricing::Candidates(candidates))
    }

    pub fn failing() -> Self {
        Self::with(Pricing::Failing)
    }

    fn with(pricing: Pricing) -> Self {
        Self {
            pricing,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutePricer for FixedPricer {
    async fn price(&self, _token_in: &Token, _token_out: &Token, amount_in: U256) -> Result<Vec<RouteCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = Route::v2("UniswapV2")?;
        match &self.pricing {
            Pricing::Rate(numerator, denominator) => Ok(vec![RouteCandidate {
                route,
                amount_out: amount_in * *numerator / *denominator,
                price_impact_bps: 0,
            }]),
            Pricing::Amount(amount_out) => Ok(vec![RouteCandidate {
                route,
                amount_out: *amount_out,
                price_impact_bps: 0,
            }]),
            Pricing::Candidates(candidates) => Ok(candidates.clone()),
            Pricing::Failing => Err(SwapError::NetworkError("pricing backend down".to_string())),
        }
    }
}

/// Hands every pricing request to the test, which answers it whenever it
/// likes; this lets tests resolve requests out of order.
pub struct GatedPricer {
    requests: mpsc::UnboundedSender<(U256, PricerReply)>,
}

impl GatedPricer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(U256, PricerReply)>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests }, receiver)
    }
}

#[async_trait]
impl RoutePricer for GatedPricer {
    async fn price(&self, _token_in: &Token, _token_out: &Token, amount_in: U256) -> Result<Vec<RouteCandidate>> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send((amount_in, reply))
            .map_err(|_| SwapError::NetworkError("test dropped pricer".to_string()))?;
        answer
            .await
            .map_err(|_| SwapError::NetworkError("test dropped reply".to_string()))?
    }
}
