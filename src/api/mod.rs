/*
 * REST API module for the swap service
 */

use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use crate::config::Config;
use crate::models::{SwapError, SwapIntent, SwapReceipt, Token};
use crate::orchestrator::SwapState;
use crate::router::RouterDiagnostics;
use crate::service::{SwapService, TokenBalance};

type ApiResult<T> = std::result::Result<Json<T>, Custom<String>>;

pub struct ApiState {
    pub config: Config,
    pub swap_service: Arc<SwapService>,
}

#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    pub token_in: String,
    pub token_out: String,
    #[serde(default)]
    pub amount_in: String,
    pub slippage_bps: Option<u16>,
    pub deadline_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SwapStatus {
    pub state: SwapState,
    pub intent: Option<SwapIntent>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutedSwap {
    pub receipt: SwapReceipt,
    pub explorer_url: Option<String>,
}

fn error_response(e: SwapError) -> Custom<String> {
    let status = match &e {
        SwapError::InvalidAmount(_)
        | SwapError::SamePairSelected
        | SwapError::InvalidSettings(_)
        | SwapError::UnknownToken(_) => Status::BadRequest,
        SwapError::WalletNotConnected => Status::Unauthorized,
        SwapError::SubmissionInProgress | SwapError::InvalidState(_) | SwapError::QuoteStale => Status::Conflict,
        SwapError::NetworkError(_) | SwapError::TokenListError(_) => Status::BadGateway,
        SwapError::ConfigError(_) | SwapError::SerializationError(_) => Status::InternalServerError,
        _ => Status::UnprocessableEntity,
    };
    if status.code >= 500 {
        error!("Request failed: {e:?}");
    }
    Custom(status, e.to_string())
}

async fn status(service: &SwapService) -> SwapStatus {
    let orchestrator = service.orchestrator();
    SwapStatus {
        state: orchestrator.state(),
        intent: orchestrator.intent().await,
        last_error: orchestrator.last_error().await,
    }
}

#[get("/health")]
pub async fn health_check() -> &'static str {
    "OK"
}

#[get("/metrics")]
pub async fn metrics(state: &State<ApiState>) -> std::result::Result<String, Custom<String>> {
    state.swap_service.metrics().render().map_err(error_response)
}

#[get("/api/v1/tokens")]
pub async fn get_tokens(state: &State<ApiState>) -> Json<Vec<Token>> {
    Json(state.swap_service.tokens().tokens().to_vec())
}

#[get("/api/v1/routers")]
pub async fn get_routers(state: &State<ApiState>) -> Json<RouterDiagnostics> {
    Json(state.swap_service.diagnostics().await)
}

#[get("/api/v1/balances")]
pub async fn get_balances(state: &State<ApiState>) -> ApiResult<Vec<TokenBalance>> {
    state
        .swap_service
        .token_balances()
        .await
        .map(Json)
        .map_err(error_response)
}

#[get("/api/v1/swap")]
pub async fn get_swap(state: &State<ApiState>) -> Json<SwapStatus> {
    Json(status(&state.swap_service).await)
}

#[post("/api/v1/swap/intent", data = "<request>")]
pub async fn set_intent(request: Json<IntentRequest>, state: &State<ApiState>) -> ApiResult<SwapStatus> {
    let service = &state.swap_service;
    let intent = service
        .build_intent(
            &request.token_in,
            &request.token_out,
            &request.amount_in,
            request.slippage_bps,
            request.deadline_minutes,
        )
        .map_err(error_response)?;
    service
        .orchestrator()
        .set_intent(intent)
        .await
        .map_err(error_response)?;
    Ok(Json(status(service).await))
}

#[post("/api/v1/swap/requote")]
pub async fn requote(state: &State<ApiState>) -> ApiResult<SwapStatus> {
    let service = &state.swap_service;
    service.orchestrator().requote().await.map_err(error_response)?;
    Ok(Json(status(service).await))
}

#[post("/api/v1/swap/flip")]
pub async fn flip(state: &State<ApiState>) -> ApiResult<SwapStatus> {
    let service = &state.swap_service;
    service.orchestrator().flip().await.map_err(error_response)?;
    Ok(Json(status(service).await))
}

#[post("/api/v1/swap/approve")]
pub async fn approve(state: &State<ApiState>) -> ApiResult<SwapStatus> {
    let service = &state.swap_service;
    service.orchestrator().approve().await.map_err(error_response)?;
    Ok(Json(status(service).await))
}

#[post("/api/v1/swap/recheck-allowance")]
pub async fn recheck_allowance(state: &State<ApiState>) -> ApiResult<SwapStatus> {
    let service = &state.swap_service;
    service
        .orchestrator()
        .recheck_allowance()
        .await
        .map_err(error_response)?;
    Ok(Json(status(service).await))
}

#[post("/api/v1/swap/execute")]
pub async fn execute(state: &State<ApiState>) -> ApiResult<ExecutedSwap> {
    let receipt = state
        .swap_service
        .orchestrator()
        .swap()
        .await
        .map_err(error_response)?;
    let explorer_url = state.config.chain.explorer_tx_url(receipt.tx_hash);
    Ok(Json(ExecutedSwap { receipt, explorer_url }))
}

#[must_use]
pub fn create_rocket(state: ApiState) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", state.config.server.host.clone()))
        .merge(("port", state.config.server.port));

    rocket::custom(figment).manage(state).mount(
        "/",
        routes![
            health_check,
            metrics,
            get_tokens,
            get_routers,
            get_balances,
            get_swap,
            set_intent,
            requote,
            flip,
            approve,
            recheck_allowance,
            execute
        ],
    )
}
