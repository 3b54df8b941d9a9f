//! Order lifecycle events from the order service.

use super::{ApiResult, AppState};
use crate::{logging, metrics};
use axum::{
    Json,
    extract::{Path, State},
};
use market_ledger::scheduler::OrderCompletion;

/// Book revenue for a completed order
///
/// Repeating the call for the same order returns 409.
pub async fn completed(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> ApiResult<Json<OrderCompletion>> {
    let completion = state.releaser.record_order_completion(order_id).await?;
    metrics::order_completions_total();
    logging::log_settlement_event(
        "order_completed",
        order_id,
        completion.shop_share + completion.platform_share,
        "pending",
    );
    Ok(Json(completion))
}
