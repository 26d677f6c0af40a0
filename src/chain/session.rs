/*
 * Wallet session backed by an ethers HTTP provider and a local signer
 */

use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, TransactionReceipt,
        TransactionRequest, H256, U256,
    },
};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use crate::models::{Result, SwapError, WalletEvent};

const EVENT_CAPACITY: usize = 16;

/// The externally supplied wallet: account identity, raw reads, signing and
/// a stream of account/network change notifications.
#[async_trait]
pub trait WalletSession: Send + Sync {
    fn account(&self) -> Option<Address>;
    async fn chain_id(&self) -> Result<u64>;
    async fn native_balance(&self, owner: Address) -> Result<U256>;
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
    async fn code_at(&self, address: Address) -> Result<Bytes>;
    async fn sign_and_send(&self, tx: TransactionRequest) -> Result<H256>;
    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<TransactionReceipt>;
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersWallet {
    provider: Arc<Provider<Http>>,
    signer: RwLock<Option<Arc<SignerClient>>>,
    chain_id: u64,
    confirmation_poll: Duration,
    events: broadcast::Sender<WalletEvent>,
}

impl EthersWallet {
    pub async fn connect(rpc_url: &str, chain_id: u64, confirmation_poll: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SwapError::NetworkError(format!("Failed to create provider: {e}")))?;

        let chain = provider
            .get_chainid()
            .await
            .map_err(|e| SwapError::NetworkError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(SwapError::ConfigError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            provider: Arc::new(provider),
            signer: RwLock::new(None),
            chain_id,
            confirmation_poll,
            events,
        })
    }

    /// Attaches a signing key and announces the new account.
    pub fn connect_signer(&self, private_key: &str) -> Result<Address> {
        let wallet = LocalWallet::from_str(private_key.trim_start_matches("0x"))
            .map_err(|e| SwapError::ConfigError(format!("Invalid private key: {e}")))?
            .with_chain_id(self.chain_id);
        let account = wallet.address();
        let client = Arc::new(SignerMiddleware::new(self.provider.as_ref().clone(), wallet));

        let mut slot = self
            .signer
            .write()
            .map_err(|_| SwapError::ConfigError("Signer lock poisoned".to_string()))?;
        *slot = Some(client);
        drop(slot);

        info!("Wallet connected: {:?}", account);
        self.publish(WalletEvent::AccountChanged { account: Some(account) });
        Ok(account)
    }

    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.signer.write() {
            *slot = None;
        }
        info!("Wallet disconnected");
        self.publish(WalletEvent::Disconnected);
    }

    fn publish(&self, event: WalletEvent) {
        // No subscribers is fine; the orchestrator may not be listening yet.
        let _ = self.events.send(event);
    }

    fn signer(&self) -> Option<Arc<SignerClient>> {
        self.signer.read().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl WalletSession for EthersWallet {
    fn account(&self) -> Option<Address> {
        self.signer().map(|client| client.address())
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| SwapError::NetworkError(format!("Failed to get chain ID: {e}")))?;
        Ok(chain.as_u64())
    }

    async fn native_balance(&self, owner: Address) -> Result<U256> {
        self.provider
            .get_balance(owner, None)
            .await
            .map_err(|e| SwapError::NetworkError(format!("Failed to get balance: {e}")))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| SwapError::NetworkError(format!("eth_call to {to:?} failed: {e}")))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.provider
            .get_code(address, None)
            .await
            .map_err(|e| SwapError::NetworkError(format!("Failed to get code at {address:?}: {e}")))
    }

    async fn sign_and_send(&self, tx: TransactionRequest) -> Result<H256> {
        let client = self.signer().ok_or(SwapError::WalletNotConnected)?;
        let tx = tx.from(client.address());
        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| SwapError::TransactionRejected(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!("Transaction submitted: {:?}", tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        let receipt = PendingTransaction::new(tx_hash, self.provider.as_ref())
            .interval(self.confirmation_poll)
            .await
            .map_err(|e| SwapError::NetworkError(format!("Failed waiting for {tx_hash:?}: {e}")))?;

        receipt.ok_or_else(|| {
            warn!("Transaction {:?} dropped from mempool", tx_hash);
            SwapError::NetworkError(format!("Transaction {tx_hash:?} was dropped"))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    pub(crate) fn rpc_result(result: serde_json::Value) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
    }

    pub(crate) async fn mock_rpc(server: &mut ServerGuard, method: &str, result: serde_json::Value) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_result(result))
            .create_async()
            .await
    }

    pub(crate) async fn connected_wallet(server: &mut ServerGuard) -> EthersWallet {
        let _chain_id = mock_rpc(server, "eth_chainId", json!("0x27")).await;
        EthersWallet::connect(&server.url(), 39, Duration::from_millis(10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_rejects_wrong_chain() {
        let mut server = Server::new_async().await;
        let _chain_id = mock_rpc(&mut server, "eth_chainId", json!("0x1")).await;

        let result = EthersWallet::connect(&server.url(), 39, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(SwapError::ConfigError(_))));
    }

    #[tokio::test]
    async fn signer_lifecycle_emits_events() {
        let mut server = Server::new_async().await;
        let wallet = connected_wallet(&mut server).await;
        let mut events = wallet.subscribe();
        assert_eq!(wallet.account(), None);

        // Well-known development key (anvil account 0).
        let account = wallet
            .connect_signer("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
            .unwrap();
        assert_eq!(wallet.account(), Some(account));
        assert_eq!(
            events.recv().await.unwrap(),
            WalletEvent::AccountChanged { account: Some(account) }
        );

        wallet.disconnect();
        assert_eq!(wallet.account(), None);
        assert_eq!(events.recv().await.unwrap(), WalletEvent::Disconnected);
    }

    #[tokio::test]
    async fn sending_without_signer_is_refused() {
        let mut server = Server::new_async().await;
        let wallet = connected_wallet(&mut server).await;

        let result = wallet.sign_and_send(TransactionRequest::new()).await;
        assert!(matches!(result, Err(SwapError::WalletNotConnected)));
    }

    #[tokio::test]
    async fn native_balance_reads_account_balance() {
        let mut server = Server::new_async().await;
        let wallet = connected_wallet(&mut server).await;
        let _balance = mock_rpc(&mut server, "eth_getBalance", json!("0xde0b6b3a7640000")).await;

        let balance = wallet.native_balance(Address::from_low_u64_be(7)).await.unwrap();
        assert_eq!(balance, U256::exp10(18));
    }
}
