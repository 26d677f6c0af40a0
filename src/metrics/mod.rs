/*
 * Prometheus counters for quote, approval and swap activity
 */

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use crate::models::{Result, SwapError};

pub struct SwapMetrics {
    registry: Registry,
    pub quotes_requested: IntCounter,
    pub quotes_discarded: IntCounter,
    pub quotes_failed: IntCounter,
    pub approvals: IntCounterVec,
    pub swaps: IntCounterVec,
}

impl SwapMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let quotes_requested = IntCounter::new("swap_quotes_requested_total", "Quote requests issued")
            .map_err(metric_error)?;
        let quotes_discarded = IntCounter::new(
            "swap_quotes_discarded_total",
            "Quote responses dropped because a newer request superseded them",
        )
        .map_err(metric_error)?;
        let quotes_failed = IntCounter::new("swap_quotes_failed_total", "Quote requests that failed")
            .map_err(metric_error)?;
        let approvals = IntCounterVec::new(
            Opts::new("swap_approvals_total", "Approval transactions by outcome"),
            &["outcome"],
        )
        .map_err(metric_error)?;
        let swaps = IntCounterVec::new(
            Opts::new("swap_transactions_total", "Swap transactions by outcome"),
            &["outcome"],
        )
        .map_err(metric_error)?;

        registry.register(Box::new(quotes_requested.clone())).map_err(metric_error)?;
        registry.register(Box::new(quotes_discarded.clone())).map_err(metric_error)?;
        registry.register(Box::new(quotes_failed.clone())).map_err(metric_error)?;
        registry.register(Box::new(approvals.clone())).map_err(metric_error)?;
        registry.register(Box::new(swaps.clone())).map_err(metric_error)?;

        Ok(Self {
            registry,
            quotes_requested,
            quotes_discarded,
            quotes_failed,
            approvals,
            swaps,
        })
    }

    pub fn record_approval(&self, outcome: &str) {
        self.approvals.with_label_values(&[outcome]).inc();
    }

    pub fn record_swap(&self, outcome: &str) {
        self.swaps.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(metric_error)
    }
}

fn metric_error(e: prometheus::Error) -> SwapError {
    SwapError::ConfigError(format!("Metrics error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_outcomes() {
        let metrics = SwapMetrics::new().unwrap();
        metrics.quotes_requested.inc();
        metrics.record_swap("confirmed");
        metrics.record_swap("confirmed");

        let text = metrics.render().unwrap();
        assert!(text.contains("swap_quotes_requested_total 1"));
        assert!(text.contains("swap_transactions_total{outcome=\"confirmed\"} 2"));
    }
}
