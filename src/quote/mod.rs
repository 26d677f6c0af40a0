/*
 * Quote engine: debounced, last-request-wins quoting over a pluggable
 * route-pricing backend
 */

pub mod onchain;

use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::metrics::SwapMetrics;
use crate::models::{PairKey, Quote, Result, Route, SwapError, Token};
use crate::utils::{from_base_units, parse_amount, to_base_units};

pub use onchain::OnChainRoutePricer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub route: Route,
    pub amount_out: U256,
    pub price_impact_bps: u32,
}

/// Prices a trade across the routes a backend knows about. `amount_in` is in
/// base units of `token_in`; returned outputs are base units of `token_out`.
#[async_trait]
pub trait RoutePricer: Send + Sync {
    async fn price(&self, token_in: &Token, token_out: &Token, amount_in: U256) -> Result<Vec<RouteCandidate>>;
}

/// Handle for one issued quote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteTicket {
    pub pair: PairKey,
    pub sequence: u64,
    pub amount_in: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteRequest {
    Pending(QuoteTicket),
    /// Empty or zero amount: nothing to quote, earlier requests are void.
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteOutcome {
    Ready(Quote),
    Superseded,
}

pub struct QuoteEngine {
    pricer: Arc<dyn RoutePricer>,
    debounce: Duration,
    sequences: Mutex<HashMap<PairKey, u64>>,
    metrics: Arc<SwapMetrics>,
}

impl QuoteEngine {
    #[must_use]
    pub fn new(pricer: Arc<dyn RoutePricer>, debounce: Duration, metrics: Arc<SwapMetrics>) -> Self {
        Self {
            pricer,
            debounce,
            sequences: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Issues a new request for the pair, voiding every earlier one.
    pub fn request_quote(&self, token_in: &Token, token_out: &Token, amount_in: &str) -> Result<QuoteRequest> {
        if token_in.address == token_out.address {
            return Err(SwapError::SamePairSelected);
        }
        let pair = PairKey {
            token_in: token_in.address,
            token_out: token_out.address,
        };
        let sequence = self.bump(pair);

        match parse_amount(amount_in, token_in.decimals)? {
            None => {
                debug!("Quote cleared for {} -> {}", token_in.symbol, token_out.symbol);
                Ok(QuoteRequest::Cleared)
            }
            Some(amount_in) => {
                self.metrics.quotes_requested.inc();
                debug!(
                    "Quote #{} requested: {} {} -> {}",
                    sequence, amount_in, token_in.symbol, token_out.symbol
                );
                Ok(QuoteRequest::Pending(QuoteTicket {
                    pair,
                    sequence,
                    amount_in,
                }))
            }
        }
    }

    pub fn invalidate(&self, pair: PairKey) {
        self.bump(pair);
    }

    #[must_use]
    pub fn current_sequence(&self, pair: PairKey) -> u64 {
        let sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
        sequences.get(&pair).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_ticket_current(&self, ticket: &QuoteTicket) -> bool {
        self.current_sequence(ticket.pair) == ticket.sequence
    }

    #[must_use]
    pub fn is_current(&self, quote: &Quote) -> bool {
        self.current_sequence(quote.pair()) == quote.generated_at
    }

    /// Waits out the debounce window, prices the trade and returns the best
    /// route. Responses for requests that were superseded in the meantime are
    /// discarded, whatever order they arrive in.
    pub async fn fetch(&self, ticket: &QuoteTicket, token_in: &Token, token_out: &Token) -> Result<QuoteOutcome> {
        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        if !self.is_ticket_current(ticket) {
            self.metrics.quotes_discarded.inc();
            debug!("Quote #{} superseded before pricing", ticket.sequence);
            return Ok(QuoteOutcome::Superseded);
        }

        let amount_in_base = to_base_units(ticket.amount_in, token_in.decimals)?;
        let priced = self.pricer.price(token_in, token_out, amount_in_base).await;

        if !self.is_ticket_current(ticket) {
            self.metrics.quotes_discarded.inc();
            debug!("Quote #{} superseded, response discarded", ticket.sequence);
            return Ok(QuoteOutcome::Superseded);
        }

        let candidates = priced.map_err(|e| {
            self.metrics.quotes_failed.inc();
            warn!("Pricing failed for quote #{}: {}", ticket.sequence, e);
            match e {
                SwapError::QuoteUnavailable(_) => e,
                other => SwapError::QuoteUnavailable(other.to_string()),
            }
        })?;

        let best = select_best(candidates)
            .filter(|c| !c.amount_out.is_zero())
            .ok_or_else(|| {
                self.metrics.quotes_failed.inc();
                SwapError::QuoteUnavailable(format!(
                    "no route for {} -> {}",
                    token_in.symbol, token_out.symbol
                ))
            })?;

        let amount_out = from_base_units(best.amount_out, token_out.decimals)?;
        let rate = amount_out.checked_div(ticket.amount_in).unwrap_or(Decimal::ZERO);
        let quote = Quote {
            token_in: token_in.address,
            token_out: token_out.address,
            amount_in: ticket.amount_in,
            amount_out,
            amount_out_base: best.amount_out,
            rate,
            route: best.route,
            price_impact_bps: best.price_impact_bps,
            generated_at: ticket.sequence,
        };

        info!(
            "Quote #{}: {} {} -> {} {} via {} (impact {} bps)",
            quote.generated_at,
            quote.amount_in,
            token_in.symbol,
            quote.amount_out,
            token_out.symbol,
            quote.route.router_id,
            quote.price_impact_bps
        );
        Ok(QuoteOutcome::Ready(quote))
    }

    fn bump(&self, pair: PairKey) -> u64 {
        let mut sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = sequences.entry(pair).or_insert(0);
        *sequence += 1;
        *sequence
    }
}

/// Highest output wins; equal outputs prefer the lower price impact.
fn select_best(candidates: Vec<RouteCandidate>) -> Option<RouteCandidate> {
    candidates.into_iter().max_by(|a, b| {
        a.amount_out
            .cmp(&b.amount_out)
            .then_with(|| b.price_impact_bps.cmp(&a.price_impact_bps))
    })
}
