//! HTTP API and settlement sweep for the marketplace ledger.

pub mod api;
pub mod config;
pub mod demo;
pub mod logging;
pub mod metrics;
