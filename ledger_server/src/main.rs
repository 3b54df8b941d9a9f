//! Marketplace ledger server.
//!
//! Serves the HTTP API and runs the settlement sweep in the background,
//! backed by PostgreSQL or, with `--in-memory`, by process memory.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use ledger_server::{
    api::{self, AppState},
    config::ServerConfig,
    demo, logging, metrics,
};
use market_ledger::{
    bank::SimulatedBank,
    db::Database,
    repository::{
        InMemoryLedgerRepository, InMemoryOrderGateway, PgLedgerRepository, PgOrderGateway,
    },
};
use pico_args::Arguments;
use tokio::sync::watch;
use tracing::info;

const HELP: &str = "\
Run the marketplace ledger server

USAGE:
  ledger_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --in-memory              Keep all state in memory and seed demo orders
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  METRICS_BIND             Prometheus scrape address (e.g., 0.0.0.0:9090)
  BANK_SIMULATION          approve | decline | unreachable | flaky
  SWEEP_INTERVAL_SECS      Seconds between settlement sweeps
  REFUND_SHORTFALL_POLICY  record_debt | reject
  Variables may also be set in a .env file
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let bind: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;
    let in_memory = pargs.contains("--in-memory");

    logging::init();

    let config = ServerConfig::from_env(bind, database_url, in_memory)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let bank = Arc::new(SimulatedBank::new(config.bank_mode));
    info!("Bank transfers simulated in {:?} mode", config.bank_mode);

    let (state, database) = match &config.database {
        Some(db_config) => {
            let db = Database::connect(db_config)
                .await
                .context("Failed to connect to database")?;
            info!("Database connected");

            let pool = db.pool().clone();
            let state = AppState::new(
                Arc::new(PgLedgerRepository::new(pool.clone())),
                Arc::new(PgOrderGateway::new(pool.clone())),
                bank,
                &config.ledger,
                Some(pool),
            );
            (state, Some(db))
        }
        None => {
            let repo = Arc::new(InMemoryLedgerRepository::new());
            let orders = Arc::new(InMemoryOrderGateway::new());
            demo::seed_demo_orders(repo.clone(), orders.clone())
                .await
                .context("Failed to seed demo orders")?;
            info!("Running in memory; state is lost on exit");

            let state = AppState::new(
                repo,
                orders,
                bank,
                &config.ledger,
                None,
            );
            (state, None)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = state.settlement_scheduler(&config.ledger);
    let sweep = tokio::spawn(scheduler.run(shutdown_rx, |report| {
        metrics::record_sweep(report);
        tracing::debug!(?report, "Settlement sweep finished");
    }));

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down server...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        tracing::error!("Settlement sweep task panicked: {}", e);
    }
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
}
