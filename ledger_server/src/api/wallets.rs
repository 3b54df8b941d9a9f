//! Wallet balance and ledger history handlers.
//!
//! Wallets are created on first read, so asking for an unknown shop or
//! customer returns a zero-balance wallet rather than 404.
//!
//! ```bash
//! curl http://localhost:8080/api/v1/wallets/shops/42
//! curl "http://localhost:8080/api/v1/ledger?wallet_kind=shop&wallet_id=42&limit=20"
//! ```

use super::{ApiResult, AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use market_ledger::{
    ledger::{EntryFilter, LedgerEntry, Page},
    refund::CustomerDebt,
    wallet::{CustomerWallet, PlatformWallet, ShopWalletSummary},
};

/// Shop balances with the ten most recent entries
pub async fn shop_wallet(
    State(state): State<AppState>,
    Path(shop_id): Path<i64>,
) -> ApiResult<Json<ShopWalletSummary>> {
    Ok(Json(state.shops.summary(shop_id).await?))
}

pub async fn shop_entries(
    State(state): State<AppState>,
    Path(shop_id): Path<i64>,
    Query(filter): Query<EntryFilter>,
) -> ApiResult<Json<Page<LedgerEntry>>> {
    Ok(Json(state.shops.history(shop_id, filter).await?))
}

pub async fn customer_wallet(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> ApiResult<Json<CustomerWallet>> {
    Ok(Json(state.customers.get_or_create(customer_id).await?))
}

pub async fn customer_entries(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
    Query(filter): Query<EntryFilter>,
) -> ApiResult<Json<Page<LedgerEntry>>> {
    Ok(Json(state.customers.history(customer_id, filter).await?))
}

/// Amounts a customer owes shops after refunds they could not cover
pub async fn customer_debts(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> ApiResult<Json<Vec<CustomerDebt>>> {
    Ok(Json(state.refunds.debts(customer_id).await?))
}

pub async fn platform_wallet(State(state): State<AppState>) -> ApiResult<Json<PlatformWallet>> {
    Ok(Json(state.platform.get_or_create().await?))
}

/// Entries across all wallets, newest first
pub async fn list_entries(
    State(state): State<AppState>,
    Query(filter): Query<EntryFilter>,
) -> ApiResult<Json<Page<LedgerEntry>>> {
    Ok(Json(state.repo.list_entries(&filter).await?))
}
