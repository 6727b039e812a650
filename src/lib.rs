//! # Reviewgate
//!
//! Abuse rate limiting and reporting for the public review submission endpoint of a
//! survey platform. Every submission is identified, checked against an allowlist and
//! counted in a fixed window; allowed submissions are forwarded to the upstream review
//! service, denied ones get `429 Too Many Requests` and leave an anonymized abuse report.
//!
//! ## Modules
//!
//! - `security`: client fingerprinting, allowlist and the limiter middleware
//! - `rate_limiter`: fixed-window counters keyed by fingerprint
//! - `reporting`: anonymization, referer correlation and persistent abuse reports
//! - `database`: SQLite pool, migrations and queries
//! - `routing`: router, handlers and the upstream client
//! - `server`: startup, background tasks and graceful shutdown
//! - `env`, `logging`, `cli`: configuration, tracing setup and the command line

pub mod cli;
pub mod database;
pub mod env;
pub mod logging;
pub mod rate_limiter;
pub mod reporting;
pub mod routing;
pub mod security;
pub mod server;

#[cfg(test)]
mod tests;

use crate::env::AppConfig;
use crate::security::AbuseLimiter;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub http_client: reqwest::Client,
    pub config: AppConfig,
    pub limiter: Arc<AbuseLimiter>,
}
