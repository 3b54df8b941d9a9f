//! Withdrawal request handlers.
//!
//! Account numbers are masked in every response.
//!
//! Request a withdrawal:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/withdrawals \
//!   -H "Content-Type: application/json" \
//!   -d '{"owner_kind":"shop","owner_id":42,"amount":500000,
//!        "bank_name":"ACB","account_number":"0123456789","account_holder":"Shop 42"}'
//! ```

use super::{ApiResult, AppState, request_id::RequestId};
use crate::{logging, metrics};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use market_ledger::{
    ledger::Page,
    withdrawal::{BankAccount, OwnerKind, WithdrawalFilter, WithdrawalRequest},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub amount: i64,
    #[serde(flatten)]
    pub bank: BankAccount,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub admin_id: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub admin_id: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
}

fn masked(mut request: WithdrawalRequest) -> WithdrawalRequest {
    request.bank.account_number = request.bank.masked_account_number();
    request
}

fn record(request: &WithdrawalRequest, operation: &str) {
    metrics::withdrawals_total(request.status.as_str());
    logging::log_settlement_event(operation, request.id, request.amount, request.status.as_str());
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> ApiResult<(StatusCode, Json<WithdrawalRequest>)> {
    let request = state
        .withdrawals
        .create(req.owner_kind, req.owner_id, req.amount, req.bank)
        .await?;
    record(&request, "withdrawal_requested");
    Ok((StatusCode::CREATED, Json(masked(request))))
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<WithdrawalFilter>,
) -> ApiResult<Json<Page<WithdrawalRequest>>> {
    let page = state.withdrawals.list(&filter).await?;
    Ok(Json(Page {
        items: page.items.into_iter().map(masked).collect(),
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithdrawalRequest>> {
    Ok(Json(masked(state.withdrawals.get(id).await?)))
}

/// Approve and debit the owner's wallet; the transfer runs in the next sweep
pub async fn approve(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(id): Path<i64>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<WithdrawalRequest>> {
    let request = state.withdrawals.approve(id, req.admin_id, req.note).await?;
    tracing::info!(
        request_id = request_id.as_str(),
        withdrawal_id = id,
        admin_id = req.admin_id,
        "Withdrawal approved"
    );
    record(&request, "withdrawal_approved");
    Ok(Json(masked(request)))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<WithdrawalRequest>> {
    let request = state.withdrawals.reject(id, req.admin_id, req.reason).await?;
    record(&request, "withdrawal_rejected");
    Ok(Json(masked(request)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<WithdrawalRequest>> {
    let request = state
        .withdrawals
        .cancel(id, req.owner_kind, req.owner_id)
        .await?;
    record(&request, "withdrawal_cancelled");
    Ok(Json(masked(request)))
}
