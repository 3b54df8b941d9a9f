//! HTTP API for the marketplace ledger.
//!
//! Caller identity (admin, shop or customer id) arrives in request bodies from
//! an upstream gateway; this service does not authenticate.
//!
//! # Modules
//!
//! - [`wallets`]: Wallet balances, entry history, debts
//! - [`platform`]: Platform payouts, adjustments and configuration
//! - [`withdrawals`]: Withdrawal requests and admin decisions
//! - [`refunds`]: Refund requests, shop responses and admin decisions
//! - [`orders`]: Order completion events
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ledger_server::api::{AppState, create_router};
//! use market_ledger::{
//!     LedgerSettings,
//!     bank::{SimulatedBank, SimulationMode},
//!     repository::{InMemoryLedgerRepository, InMemoryOrderGateway},
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::new(
//!     Arc::new(InMemoryLedgerRepository::new()),
//!     Arc::new(InMemoryOrderGateway::new()),
//!     Arc::new(SimulatedBank::new(SimulationMode::Approve)),
//!     &LedgerSettings::default(),
//!     None,
//! );
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod orders;
pub mod platform;
pub mod refunds;
pub mod request_id;
pub mod wallets;
pub mod withdrawals;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use market_ledger::{
    LedgerError, LedgerSettings,
    bank::BankTransfer,
    db::timeouts::{DEFAULT_QUERY_TIMEOUT, with_timeout},
    refund::RefundManager,
    repository::{LedgerRepository, OrderGateway},
    scheduler::{BalanceReleaser, SettlementScheduler},
    wallet::{CustomerWalletStore, PlatformWalletStore, ShopWalletStore},
    withdrawal::WithdrawalManager,
};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn LedgerRepository>,
    pub shops: ShopWalletStore,
    pub customers: CustomerWalletStore,
    pub platform: PlatformWalletStore,
    pub withdrawals: WithdrawalManager,
    pub refunds: RefundManager,
    pub releaser: BalanceReleaser,
    /// Present when backed by PostgreSQL, used by the health check
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        orders: Arc<dyn OrderGateway>,
        bank: Arc<dyn BankTransfer>,
        settings: &LedgerSettings,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            shops: ShopWalletStore::new(repo.clone()),
            customers: CustomerWalletStore::new(repo.clone()),
            platform: PlatformWalletStore::new(repo.clone()),
            withdrawals: WithdrawalManager::new(repo.clone(), bank, settings.transfer_timeout),
            refunds: RefundManager::new(repo.clone(), orders.clone(), settings.refund_policy),
            releaser: BalanceReleaser::new(repo.clone(), orders),
            repo,
            pool,
        }
    }

    /// Background sweep sharing this state's managers
    pub fn settlement_scheduler(&self, settings: &LedgerSettings) -> SettlementScheduler {
        SettlementScheduler::new(
            self.releaser.clone(),
            self.withdrawals.clone(),
            settings.sweep_interval,
            settings.batch_size,
        )
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Ledger error carried to the HTTP edge
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::Validation(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientPendingBalance { .. } => StatusCode::BAD_REQUEST,
            LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
            err if err.is_conflict() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            error: self.0.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Handler result
pub type ApiResult<T> = Result<T, ApiError>;

/// Create the complete API router with all endpoints and middleware.
///
/// ```text
/// GET  /health
/// GET  /api/v1/wallets/shops/{id}
/// GET  /api/v1/wallets/shops/{id}/entries
/// GET  /api/v1/wallets/customers/{id}
/// GET  /api/v1/wallets/customers/{id}/entries
/// GET  /api/v1/wallets/customers/{id}/debts
/// GET  /api/v1/wallets/platform
/// GET  /api/v1/ledger
/// POST /api/v1/platform/adjust
/// POST /api/v1/platform/payout
/// GET  /api/v1/config
/// PUT  /api/v1/config
/// POST /api/v1/withdrawals
/// GET  /api/v1/withdrawals
/// GET  /api/v1/withdrawals/{id}
/// POST /api/v1/withdrawals/{id}/approve
/// POST /api/v1/withdrawals/{id}/reject
/// POST /api/v1/withdrawals/{id}/cancel
/// POST /api/v1/refunds
/// GET  /api/v1/refunds
/// GET  /api/v1/refunds/{id}
/// POST /api/v1/refunds/{id}/respond
/// POST /api/v1/refunds/{id}/approve
/// POST /api/v1/refunds/{id}/reject
/// POST /api/v1/orders/{id}/completed
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_v1_router())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/wallets/shops/{shop_id}", get(wallets::shop_wallet))
        .route("/wallets/shops/{shop_id}/entries", get(wallets::shop_entries))
        .route("/wallets/customers/{customer_id}", get(wallets::customer_wallet))
        .route(
            "/wallets/customers/{customer_id}/entries",
            get(wallets::customer_entries),
        )
        .route(
            "/wallets/customers/{customer_id}/debts",
            get(wallets::customer_debts),
        )
        .route("/wallets/platform", get(wallets::platform_wallet))
        .route("/ledger", get(wallets::list_entries))
        .route("/platform/adjust", post(platform::adjust))
        .route("/platform/payout", post(platform::payout))
        .route(
            "/config",
            get(platform::get_config).put(platform::update_config),
        )
        .route(
            "/withdrawals",
            post(withdrawals::create).get(withdrawals::list),
        )
        .route("/withdrawals/{id}", get(withdrawals::get))
        .route("/withdrawals/{id}/approve", post(withdrawals::approve))
        .route("/withdrawals/{id}/reject", post(withdrawals::reject))
        .route("/withdrawals/{id}/cancel", post(withdrawals::cancel))
        .route("/refunds", post(refunds::create).get(refunds::list))
        .route("/refunds/{id}", get(refunds::get))
        .route("/refunds/{id}/respond", post(refunds::respond))
        .route("/refunds/{id}/approve", post(refunds::approve))
        .route("/refunds/{id}/reject", post(refunds::reject))
        .route("/orders/{order_id}/completed", post(orders::completed))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","backend":"postgres","database":true,"timestamp":"2026-10-18T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (backend, storage_healthy) = match &state.pool {
        Some(pool) => (
            "postgres",
            with_timeout(DEFAULT_QUERY_TIMEOUT, sqlx::query("SELECT 1").fetch_one(pool))
                .await
                .is_ok(),
        ),
        None => ("memory", state.repo.platform_config().await.is_ok()),
    };

    let status_code = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if storage_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "backend": backend,
        "database": storage_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
