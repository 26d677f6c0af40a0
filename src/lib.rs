/*
 * U2U Swap - swap orchestration engine
 * Core library exports and module declarations
 */

pub mod allowance;
pub mod api;
pub mod balance;
pub mod chain;
pub mod config;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod quote;
pub mod router;
pub mod service;
pub mod tokens;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use models::*;
pub use orchestrator::{SwapOrchestrator, SwapState};
pub use service::SwapService;
