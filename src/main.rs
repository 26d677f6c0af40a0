/*
 * U2U Swap - swap orchestration service
 * Main entry point for the application
 */

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use u2u_swap::{api, config::Config, service::SwapService};

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(config.as_ref().map_or("info", |c| c.server.log_level.as_str()));

    info!("Starting U2U swap service");

    let config = config
        .map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })
        .context("loading configuration")?;

    info!("Configuration loaded for {} (chain {})", config.chain.name, config.chain.chain_id);

    let swap_service = SwapService::new(config.clone())
        .await
        .context("initializing swap service")?;

    let api_state = api::ApiState {
        config: config.clone(),
        swap_service: Arc::new(swap_service),
    };

    info!("Starting API server on {}:{}", config.server.host, config.server.port);

    api::create_rocket(api_state)
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("API server failed: {e}"))?;

    Ok(())
}

/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` applies to this crate.
fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("u2u_swap={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
