//! Prometheus metrics for the ledger server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts and duration by route and status
//! - **Settlement Metrics**: Withdrawal and refund transitions, order completions
//! - **Sweep Metrics**: Released balances and withdrawal batch outcomes

use market_ledger::scheduler::SweepReport;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Settlement Metrics
// ============================================================================

/// Withdrawal reached `status` through the API.
pub fn withdrawals_total(status: &str) {
    metrics::counter!("withdrawals_total", "status" => status.to_string()).increment(1);
}

/// Refund reached `status` through the API.
pub fn refunds_total(status: &str) {
    metrics::counter!("refunds_total", "status" => status.to_string()).increment(1);
}

/// Amount moved by refunds, by recipient.
pub fn refund_amount(recipient: &str, amount: i64) {
    metrics::histogram!("refund_amount", "recipient" => recipient.to_string()).record(amount as f64);
}

pub fn order_completions_total() {
    metrics::counter!("order_completions_total").increment(1);
}

// ============================================================================
// Sweep Metrics
// ============================================================================

/// Record the outcome of one settlement sweep.
pub fn record_sweep(report: &SweepReport) {
    metrics::counter!("sweeps_total").increment(1);
    metrics::counter!("released_orders_total").increment(report.release.orders as u64);
    metrics::counter!("released_amount_total").increment(report.release.amount.max(0) as u64);
    metrics::counter!("release_errors_total").increment(report.release.errors as u64);
    metrics::gauge!("matured_orders_unbooked").set(report.release.skipped as f64);

    let withdrawals = &report.withdrawals;
    metrics::counter!("withdrawal_transfers_total", "outcome" => "completed")
        .increment(withdrawals.completed as u64);
    metrics::counter!("withdrawal_transfers_total", "outcome" => "failed")
        .increment(withdrawals.failed as u64);
    metrics::counter!("withdrawal_transfers_total", "outcome" => "in_doubt")
        .increment(withdrawals.in_doubt as u64);
    metrics::gauge!("withdrawals_in_doubt").set(withdrawals.in_doubt as f64);
    metrics::counter!("withdrawal_errors_total").increment(withdrawals.errors as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        withdrawals_total("approved");
        refunds_total("completed");
        refund_amount("customer", 1_000);
        order_completions_total();
        record_sweep(&SweepReport::default());
    }
}
