//! Refund request handlers.
//!
//! Approval distributes the money in the same call, so its response already
//! carries the final Completed or Failed state.

use super::{ApiResult, AppState, request_id::RequestId};
use crate::{logging, metrics};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use market_ledger::{
    LedgerError,
    ledger::Page,
    refund::{RefundFilter, RefundReason, RefundRequest, RefundStatus},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub order_id: i64,
    pub requested_by: i64,
    pub reason_type: RefundReason,
    pub reason: Option<String>,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub note: String,
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

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRefundRequest>,
) -> ApiResult<(StatusCode, Json<RefundRequest>)> {
    let request = state
        .refunds
        .create(
            req.order_id,
            req.requested_by,
            req.reason_type,
            req.reason,
            req.amount,
        )
        .await?;
    metrics::refunds_total(request.status.as_str());
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<RefundFilter>,
) -> ApiResult<Json<Page<RefundRequest>>> {
    Ok(Json(state.refunds.list(&filter).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RefundRequest>> {
    Ok(Json(state.refunds.get(id).await?))
}

/// Shop's side of the story
pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<RefundRequest>> {
    Ok(Json(state.refunds.respond(id, req.note).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(id): Path<i64>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<RefundRequest>> {
    let result = state.refunds.approve(id, req.admin_id, req.note).await;

    match &result {
        Ok(_) => metrics::refunds_total(RefundStatus::Completed.as_str()),
        // Never got past approval
        Err(LedgerError::IllegalStateTransition { .. } | LedgerError::NotFound { .. }) => {}
        // Distribution failed and the request is now Failed
        Err(_) => metrics::refunds_total(RefundStatus::Failed.as_str()),
    }

    let request = result?;
    tracing::info!(
        request_id = request_id.as_str(),
        refund_id = id,
        admin_id = req.admin_id,
        "Refund approved"
    );
    metrics::refund_amount(request.recipient.as_str(), request.refund_amount);
    logging::log_settlement_event(
        "refund_completed",
        request.id,
        request.refund_amount,
        request.status.as_str(),
    );
    Ok(Json(request))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<RefundRequest>> {
    let request = state.refunds.reject(id, req.admin_id, req.reason).await?;
    metrics::refunds_total(request.status.as_str());
    Ok(Json(request))
}
