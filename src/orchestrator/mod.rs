/*
 * Swap orchestrator: drives one intent from quote to settlement
 *
 * Every async result is checked against the intent generation before it is
 * applied; results for an older generation are dropped. The in-flight slot is
 * independent of the generation so that at most one transaction is pending
 * even when the intent changes underneath it.
 */

pub mod state;

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::allowance::{AllowanceGate, AllowanceState};
use crate::balance::BalanceTracker;
use crate::chain::{ChainClient, SwapCall, TxStatus};
use crate::metrics::SwapMetrics;
use crate::models::{Allowance, ReceiptStatus, Result, SwapError, SwapIntent, SwapReceipt, WalletEvent};
use crate::quote::{QuoteEngine, QuoteOutcome, QuoteRequest, QuoteTicket};
use crate::router::RouterRegistry;
use crate::utils::{deadline_from, from_base_units, to_base_units};

pub use state::{SettleOutcome, SwapState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Approval,
    Swap,
}

struct Inner {
    generation: u64,
    intent: Option<SwapIntent>,
    state: SwapState,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

pub struct SwapOrchestrator {
    chain: Arc<dyn ChainClient>,
    quotes: Arc<QuoteEngine>,
    allowances: Arc<AllowanceGate>,
    balances: Arc<BalanceTracker>,
    routers: Arc<RouterRegistry>,
    metrics: Arc<SwapMetrics>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SwapState>,
}

impl SwapOrchestrator {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        quotes: Arc<QuoteEngine>,
        allowances: Arc<AllowanceGate>,
        balances: Arc<BalanceTracker>,
        routers: Arc<RouterRegistry>,
        metrics: Arc<SwapMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SwapState::Idle);
        Self {
            chain,
            quotes,
            allowances,
            balances,
            routers,
            metrics,
            inner: Mutex::new(Inner {
                generation: 0,
                intent: None,
                state: SwapState::Idle,
                in_flight: None,
                last_error: None,
            }),
            state_tx,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SwapState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SwapState {
        self.state_tx.borrow().clone()
    }

    pub async fn intent(&self) -> Option<SwapIntent> {
        self.inner.lock().await.intent.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    /// Replaces the active intent and restarts the flow. Any pending quote,
    /// approval or swap result for the previous intent is discarded when it
    /// arrives.
    pub async fn set_intent(self: &Arc<Self>, intent: SwapIntent) -> Result<()> {
        intent.validate_settings()?;
        let mut inner = self.inner.lock().await;
        self.begin(&mut inner, intent)
    }

    /// Requests a fresh quote for the unchanged intent.
    pub async fn requote(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_transacting() {
            return Err(SwapError::InvalidState(inner.state.name().to_string()));
        }
        let intent = inner
            .intent
            .clone()
            .ok_or_else(|| SwapError::InvalidState("no intent to quote".to_string()))?;
        self.begin(&mut inner, intent)
    }

    /// Swaps direction. The quoted output, when there is one, becomes the new
    /// input amount.
    pub async fn flip(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let intent = inner
            .intent
            .clone()
            .ok_or_else(|| SwapError::InvalidState("no intent to flip".to_string()))?;
        let amount_in = inner
            .state
            .quote()
            .map(|quote| quote.amount_out.normalize().to_string())
            .unwrap_or_default();

        let flipped = SwapIntent {
            token_in: intent.token_out,
            token_out: intent.token_in,
            amount_in,
            ..intent
        };
        self.begin(&mut inner, flipped)
    }

    fn begin(self: &Arc<Self>, inner: &mut Inner, intent: SwapIntent) -> Result<()> {
        inner.generation += 1;
        let generation = inner.generation;
        self.allowances.reset();

        let previous = inner.intent.replace(intent.clone());
        let pair_changed = previous.as_ref().map(SwapIntent::pair) != Some(intent.pair());
        if let Some(previous) = previous.filter(|p| p.pair() != intent.pair()) {
            self.quotes.invalidate(previous.pair());
        }

        // Selecting tokens refreshes balances whether or not an amount is set.
        if pair_changed {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.refresh_balances().await {
                    debug!("Balance refresh skipped: {}", e);
                }
            });
        }

        let request = self
            .quotes
            .request_quote(&intent.token_in, &intent.token_out, &intent.amount_in);

        let ticket = match request {
            Ok(QuoteRequest::Pending(ticket)) => ticket,
            Ok(QuoteRequest::Cleared) => {
                inner.last_error = None;
                self.publish(inner, SwapState::Idle);
                return Ok(());
            }
            Err(e) => {
                inner.last_error = Some(e.to_string());
                self.publish(inner, SwapState::Idle);
                return Err(e);
            }
        };

        inner.last_error = None;
        self.publish(
            inner,
            SwapState::QuotePending {
                intent: intent.clone(),
                ticket: ticket.clone(),
            },
        );

        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive_quote(generation, intent, ticket).await });
        Ok(())
    }

    async fn drive_quote(self: Arc<Self>, generation: u64, intent: SwapIntent, ticket: QuoteTicket) {
        let outcome = self.quotes.fetch(&ticket, &intent.token_in, &intent.token_out).await;

        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                debug!("Quote #{} arrived for an abandoned intent", ticket.sequence);
                return;
            }
            match outcome {
                Ok(QuoteOutcome::Ready(quote)) => {
                    self.publish(&mut inner, SwapState::QuoteReady { intent, quote });
                }
                Ok(QuoteOutcome::Superseded) => return,
                Err(e) => {
                    inner.last_error = Some(e.to_string());
                    self.publish(&mut inner, SwapState::Idle);
                    return;
                }
            }
        }

        if let Err(e) = self.evaluate_allowance(generation).await {
            let retry_in = self.allowances.recheck_interval();
            warn!("Allowance check failed, retrying in {:?}: {}", retry_in, e);
            tokio::time::sleep(retry_in).await;
            if let Err(e) = self.evaluate_allowance(generation).await {
                warn!("Allowance check failed again, staying on quote until rechecked: {}", e);
            }
        }
    }

    /// Re-reads the allowance for the current quote, e.g. after an approval
    /// made outside this orchestrator.
    pub async fn recheck_allowance(&self) -> Result<SwapState> {
        let generation = self.inner.lock().await.generation;
        self.evaluate_allowance(generation).await?;
        Ok(self.state())
    }

    async fn evaluate_allowance(&self, generation: u64) -> Result<()> {
        let (intent, quote) = {
            let inner = self.inner.lock().await;
            if inner.generation != generation {
                return Ok(());
            }
            match inner.state.awaiting_allowance() {
                Some((intent, quote)) => (intent.clone(), quote.clone()),
                None => {
                    return Err(SwapError::InvalidState(inner.state.name().to_string()));
                }
            }
        };

        let next = if intent.token_in.is_native() {
            SwapState::ReadyToSwap {
                intent,
                quote: quote.clone(),
            }
        } else {
            let Some(owner) = self.chain.account().await else {
                debug!("No account connected, allowance check deferred");
                return Ok(());
            };
            let amount = to_base_units(quote.amount_in, intent.token_in.decimals)?;
            match self.allowances.check(&intent.token_in, owner, amount).await? {
                AllowanceState::Checked {
                    sufficient: false,
                    allowance,
                } => SwapState::ApprovalRequired {
                    intent,
                    quote: quote.clone(),
                    allowance,
                },
                _ => SwapState::ReadyToSwap {
                    intent,
                    quote: quote.clone(),
                },
            }
        };

        let mut inner = self.inner.lock().await;
        let unchanged = inner.generation == generation
            && inner
                .state
                .awaiting_allowance()
                .is_some_and(|(_, current)| current.generated_at == quote.generated_at);
        if unchanged {
            self.publish(&mut inner, next);
        }
        Ok(())
    }

    /// Approves exactly the quoted input amount for the swap helper.
    pub async fn approve(&self) -> Result<Allowance> {
        let owner = self.chain.account().await.ok_or(SwapError::WalletNotConnected)?;

        let (generation, intent, quote, observed, amount) = {
            let mut inner = self.inner.lock().await;
            if inner.in_flight.is_some() {
                return Err(SwapError::SubmissionInProgress);
            }
            let SwapState::ApprovalRequired {
                intent,
                quote,
                allowance,
            } = inner.state.clone()
            else {
                return Err(SwapError::InvalidState(inner.state.name().to_string()));
            };
            let amount = to_base_units(quote.amount_in, intent.token_in.decimals)?;

            inner.in_flight = Some(InFlight::Approval);
            inner.last_error = None;
            self.publish(
                &mut inner,
                SwapState::Approving {
                    intent: intent.clone(),
                    quote: quote.clone(),
                },
            );
            (inner.generation, intent, quote, allowance, amount)
        };

        let result = self.allowances.approve(&intent.token_in, owner, amount).await;

        let mut inner = self.inner.lock().await;
        inner.in_flight = None;
        if inner.generation != generation {
            debug!("Approval resolved for an abandoned intent");
            return result;
        }
        match &result {
            Ok(_) => self.publish(&mut inner, SwapState::ReadyToSwap { intent, quote }),
            Err(e) => {
                inner.last_error = Some(e.to_string());
                self.publish(
                    &mut inner,
                    SwapState::ApprovalRequired {
                        intent,
                        quote,
                        allowance: observed,
                    },
                );
            }
        }
        result
    }

    /// Submits the swap for the current quote and waits for it to be mined.
    pub async fn swap(self: &Arc<Self>) -> Result<SwapReceipt> {
        let (generation, intent, quote) = {
            let inner = self.inner.lock().await;
            if inner.in_flight.is_some() {
                return Err(SwapError::SubmissionInProgress);
            }
            match &inner.state {
                SwapState::ReadyToSwap { intent, quote } => (inner.generation, intent.clone(), quote.clone()),
                other => return Err(SwapError::InvalidState(other.name().to_string())),
            }
        };

        if !self.quotes.is_current(&quote) {
            return Err(self.stale(generation).await);
        }

        let owner = self.chain.account().await.ok_or(SwapError::WalletNotConnected)?;
        let available = self.balances.refresh(&intent.token_in, owner).await;
        if quote.amount_in > available {
            let error = SwapError::InsufficientBalance {
                required: quote.amount_in,
                available,
            };
            self.inner.lock().await.last_error = Some(error.to_string());
            return Err(error);
        }
        self.routers.resolve(quote.route.router_id).await?;

        let call = {
            let mut inner = self.inner.lock().await;
            if inner.in_flight.is_some() {
                return Err(SwapError::SubmissionInProgress);
            }
            let unchanged = inner.generation == generation
                && matches!(&inner.state, SwapState::ReadyToSwap { quote: current, .. } if *current == quote);
            if !unchanged {
                return Err(SwapError::QuoteStale);
            }
            if !self.quotes.is_current(&quote) {
                drop(inner);
                return Err(self.stale(generation).await);
            }

            let call = SwapCall {
                router_id: quote.route.router_id,
                kind: quote.route.kind,
                amount_in: to_base_units(quote.amount_in, intent.token_in.decimals)?,
                amount_out_min: quote.min_received_base(intent.slippage_bps),
                path: vec![intent.token_in.address, intent.token_out.address],
                deadline: deadline_from(Utc::now(), intent.deadline_minutes),
            };
            inner.in_flight = Some(InFlight::Swap);
            inner.last_error = None;
            self.publish(
                &mut inner,
                SwapState::Submitting {
                    intent: intent.clone(),
                    quote: quote.clone(),
                },
            );
            call
        };

        info!(
            "Swapping {} {} for at least {} base units of {} via {}",
            quote.amount_in, intent.token_in.symbol, call.amount_out_min, intent.token_out.symbol, call.router_id
        );

        let tx_hash = match self.chain.execute_swap(&call).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.fail_swap(generation, intent, e).await),
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation {
                self.publish(
                    &mut inner,
                    SwapState::Confirming {
                        intent: intent.clone(),
                        quote: quote.clone(),
                        tx_hash,
                    },
                );
            }
        }

        let outcome = match self.chain.wait_for_confirmation(tx_hash).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail_swap(generation, intent, e).await),
        };

        let amount_out = match outcome.amount_out {
            Some(executed) => from_base_units(executed, intent.token_out.decimals).unwrap_or(quote.amount_out),
            None => quote.amount_out,
        };
        let confirmed = outcome.status == TxStatus::Confirmed;
        let receipt = SwapReceipt {
            tx_hash,
            status: if confirmed {
                ReceiptStatus::Confirmed
            } else {
                ReceiptStatus::Reverted
            },
            amount_in: quote.amount_in,
            amount_out,
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        inner.in_flight = None;
        let current = inner.generation == generation;

        if !confirmed {
            warn!("Swap {:?} reverted", tx_hash);
            self.metrics.record_swap("reverted");
            let error = SwapError::TransactionReverted(format!("{tx_hash:?}"));
            if current {
                inner.last_error = Some(error.to_string());
                self.publish(
                    &mut inner,
                    SwapState::Settled {
                        intent,
                        outcome: SettleOutcome::Reverted { receipt },
                    },
                );
            }
            return Err(error);
        }

        info!(
            "Swap {:?} confirmed in block {:?}: received {} {}",
            tx_hash, outcome.block_number, amount_out, intent.token_out.symbol
        );
        self.metrics.record_swap("confirmed");
        if current {
            let cleared = SwapIntent {
                amount_in: String::new(),
                ..intent.clone()
            };
            inner.intent = Some(cleared.clone());
            self.publish(
                &mut inner,
                SwapState::Settled {
                    intent: cleared,
                    outcome: SettleOutcome::Success {
                        receipt: receipt.clone(),
                    },
                },
            );
        }
        drop(inner);

        self.balances
            .refresh_pair(&intent.token_in, &intent.token_out, owner)
            .await;
        Ok(receipt)
    }

    async fn fail_swap(&self, generation: u64, intent: SwapIntent, error: SwapError) -> SwapError {
        warn!("Swap failed: {}", error);
        self.metrics.record_swap("failed");
        let mut inner = self.inner.lock().await;
        inner.in_flight = None;
        if inner.generation == generation {
            inner.last_error = Some(error.to_string());
            self.publish(
                &mut inner,
                SwapState::Settled {
                    intent,
                    outcome: SettleOutcome::Failed {
                        reason: error.to_string(),
                    },
                },
            );
        }
        error
    }

    /// The quote was overtaken by a newer request: never submit it, quote again.
    async fn stale(self: &Arc<Self>, generation: u64) -> SwapError {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            if let Some(intent) = inner.intent.clone() {
                info!("Quote went stale before submission, re-quoting");
                if let Err(e) = self.begin(&mut inner, intent) {
                    warn!("Re-quote failed: {}", e);
                }
            }
        }
        inner.last_error = Some(SwapError::QuoteStale.to_string());
        SwapError::QuoteStale
    }

    /// Reads both intent balances for the connected account.
    pub async fn refresh_balances(&self) -> Result<(Decimal, Decimal)> {
        let owner = self.chain.account().await.ok_or(SwapError::WalletNotConnected)?;
        let intent = self
            .intent()
            .await
            .ok_or_else(|| SwapError::InvalidState("no intent selected".to_string()))?;
        Ok(self
            .balances
            .refresh_pair(&intent.token_in, &intent.token_out, owner)
            .await)
    }

    /// Account or network changes invalidate everything observed so far and
    /// restart the active intent.
    pub async fn handle_wallet_event(self: &Arc<Self>, event: WalletEvent) {
        info!("Wallet event: {:?}", event);
        self.balances.clear();
        if matches!(event, WalletEvent::ChainChanged { .. }) {
            self.routers.clear().await;
        }

        let mut inner = self.inner.lock().await;
        match inner.intent.clone() {
            Some(intent) => {
                // Dropping the old intent first makes begin() treat the pair as
                // new, which triggers a balance refresh for the new account.
                inner.intent = None;
                if let Err(e) = self.begin(&mut inner, intent) {
                    debug!("Intent not re-quoted after wallet event: {}", e);
                }
            }
            None => {
                inner.generation += 1;
                self.allowances.reset();
                self.publish(&mut inner, SwapState::Idle);
            }
        }
    }

    pub fn spawn_wallet_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.chain.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_wallet_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Wallet listener lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Wallet event stream closed");
        })
    }

    fn publish(&self, inner: &mut Inner, next: SwapState) {
        if inner.state.name() != next.name() {
            info!("Swap state {} -> {}", inner.state.name(), next.name());
        }
        inner.state = next.clone();
        self.state_tx.send_replace(next);
    }
}
