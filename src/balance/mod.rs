/*
 * Balance tracker: last observed wallet balances per token
 */

use ethers::types::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use crate::chain::ChainClient;
use crate::models::{Result, Token};
use crate::utils::from_base_units;

pub struct BalanceTracker {
    chain: Arc<dyn ChainClient>,
    observed: Mutex<HashMap<(Address, Address), Decimal>>,
}

impl BalanceTracker {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the balance from the chain and records it.
    pub async fn try_refresh(&self, token: &Token, owner: Address) -> Result<Decimal> {
        let raw = self.chain.balance_of(token, owner).await?;
        let balance = from_base_units(raw, token.decimals)?;
        debug!("Balance of {:?}: {} {}", owner, balance, token.symbol);
        self.record(token, owner, balance);
        Ok(balance)
    }

    /// Like `try_refresh`, but a failed read is reported as zero.
    pub async fn refresh(&self, token: &Token, owner: Address) -> Decimal {
        match self.try_refresh(token, owner).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Failed to read {} balance for {:?}: {}", token.symbol, owner, e);
                self.record(token, owner, Decimal::ZERO);
                Decimal::ZERO
            }
        }
    }

    pub async fn refresh_pair(&self, token_in: &Token, token_out: &Token, owner: Address) -> (Decimal, Decimal) {
        tokio::join!(self.refresh(token_in, owner), self.refresh(token_out, owner))
    }

    #[must_use]
    pub fn observed(&self, token: &Token, owner: Address) -> Option<Decimal> {
        let observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        observed.get(&(token.address, owner)).copied()
    }

    pub fn clear(&self) {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, token: &Token, owner: Address, balance: Decimal) {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((token.address, owner), balance);
    }
}
