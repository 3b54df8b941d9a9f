//! Platform wallet operations and persisted configuration.

use super::{ApiResult, AppState};
use crate::logging;
use axum::{Json, extract::State};
use market_ledger::{PlatformConfig, wallet::PlatformWallet};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: i64,
    /// Operator-side payout record
    pub payout_id: i64,
    #[serde(default)]
    pub description: String,
}

/// Signed manual correction of the platform balance
pub async fn adjust(
    State(state): State<AppState>,
    Json(req): Json<AdjustRequest>,
) -> ApiResult<Json<PlatformWallet>> {
    let wallet = state
        .platform
        .manual_adjust(req.amount, &req.description)
        .await?;
    logging::log_settlement_event("platform_adjust", 0, req.amount, "applied");
    Ok(Json(wallet))
}

/// Move platform earnings out to the operator's bank account
pub async fn payout(
    State(state): State<AppState>,
    Json(req): Json<PayoutRequest>,
) -> ApiResult<Json<PlatformWallet>> {
    let description = if req.description.trim().is_empty() {
        format!("Payout #{}", req.payout_id)
    } else {
        req.description
    };
    let wallet = state
        .platform
        .payout(req.amount, req.payout_id, &description)
        .await?;
    logging::log_settlement_event("platform_payout", req.payout_id, req.amount, "paid");
    Ok(Json(wallet))
}

pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<PlatformConfig>> {
    Ok(Json(state.repo.platform_config().await?))
}

/// Replace the configuration record after validating it
pub async fn update_config(
    State(state): State<AppState>,
    Json(config): Json<PlatformConfig>,
) -> ApiResult<Json<PlatformConfig>> {
    config.validate()?;
    let updated = state.repo.update_platform_config(&config).await?;
    tracing::info!(?updated, "Platform configuration updated");
    Ok(Json(updated))
}
