//! # Abuse Limiter Middleware Module
//!
//! This module guards the review submission endpoint against flooding. Every
//! inbound request is identified, checked against the allowlist, counted, and
//! either passed through or rejected with `429 Too Many Requests`.
//!
//! ## Features
//!
//! - **Client Identification**: Proxy headers first, socket address as a fallback
//! - **Allowlist Bypass**: Exempt clients never create a window or a report
//! - **Fixed Window Limiting**: Per client counting via `RateWindowStore`
//! - **Anonymized Reporting**: Each deny produces a `ViolationReport` with a salted,
//!   hour-bucketed id and the product/button taken from the referer
//! - **Statistics**: Atomic counters exposed on the health endpoint
//!
//! ## Request Flow
//!
//! 1. **Resolve**: derive the client fingerprint from the request
//! 2. **Allowlist Check**: exempt clients bypass everything below
//! 3. **Rate Check**: count the request in the client's window
//! 4. **Proceed** when under the limit, otherwise **Report and Deny**
//!
//! A denied request is answered with 429 whatever happens to its report.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let limiter = Arc::new(AbuseLimiter::new(LimiterConfig::from_app_config(&config)?, handler));
//!
//! let app = Router::new()
//!     .route("/api/trpc/review.create", post(forward_review))
//!     .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
//! ```

use crate::env::AppConfig;
use crate::rate_limiter::RateWindowStore;
use crate::reporting::{
    ViolationHandler, ViolationReport,
    anonymize::{AnonymizingHasher, coarse_address},
    correlation::extract_target,
};
use crate::security::{
    allowlist::{Allowlist, AllowlistError},
    fingerprint::resolve_fingerprint,
    types::LimiterError,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Everything the limiter needs, resolved once at start-up
#[derive(Clone)]
pub struct LimiterConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub allowlist: Allowlist,
    pub salt: String,
    pub max_tracked_windows: usize,
}

impl LimiterConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AllowlistError> {
        Ok(Self {
            window: Duration::from_millis(config.rate_window_ms),
            max_requests: config.rate_max,
            allowlist: Allowlist::parse(&config.allowlist)?,
            salt: config.hash_salt.clone(),
            max_tracked_windows: config.max_tracked_windows,
        })
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("allowlist_entries", &self.allowlist.len())
            .field("max_tracked_windows", &self.max_tracked_windows)
            .field("salt", &"<redacted>")
            .finish()
    }
}

/// Result of evaluating one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOutcome {
    /// Allowlisted client, not counted
    Bypass,
    /// Counted and under the limit
    Proceed,
    /// Over the limit; a report has been handed to the violation handler
    Denied { retry_after: Duration },
}

/// Snapshot of the limiter counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub allowed: u64,
    pub denied: u64,
    pub bypassed: u64,
    pub reports_dropped: u64,
    pub tracked_windows: usize,
}

/// The request guard: fingerprinting, allowlist, windows and reporting
pub struct AbuseLimiter {
    windows: RateWindowStore,
    allowlist: Allowlist,
    hasher: AnonymizingHasher,
    handler: Arc<dyn ViolationHandler>,
    allowed: AtomicU64,
    denied: AtomicU64,
    bypassed: AtomicU64,
}

impl AbuseLimiter {
    pub fn new(config: LimiterConfig, handler: Arc<dyn ViolationHandler>) -> Self {
        Self {
            windows: RateWindowStore::with_max_windows(
                config.max_requests,
                config.window,
                config.max_tracked_windows,
            ),
            allowlist: config.allowlist,
            hasher: AnonymizingHasher::new(config.salt),
            handler,
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
        }
    }

    /// Evaluate a request against the current clocks
    pub fn evaluate(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> LimitOutcome {
        self.evaluate_at(headers, peer, Instant::now(), Utc::now())
    }

    /// Evaluate a request with caller supplied clocks: `now` drives the window,
    /// `wall` picks the hour bucket and the report timestamps
    pub fn evaluate_at(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> LimitOutcome {
        let fingerprint = resolve_fingerprint(headers, peer);

        if !fingerprint.is_from_headers() {
            debug!(
                fingerprint = %fingerprint,
                source = fingerprint.source().as_str(),
                "No client address header, using low precision fingerprint"
            );
        }

        if self.allowlist.is_allowed(fingerprint.as_str()) {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint, "Allowlisted client, skipping rate limit");
            return LimitOutcome::Bypass;
        }

        let decision = self.windows.check_at(fingerprint.as_str(), now);
        if decision.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
            return LimitOutcome::Proceed;
        }

        self.denied.fetch_add(1, Ordering::Relaxed);

        let referer = headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok());
        let report = ViolationReport {
            anonymized_id: self.hasher.anonymize(fingerprint.as_str(), wall),
            coarse_address: coarse_address(fingerprint.as_str()),
            target: extract_target(referer),
            initial_attempts: i64::from(self.windows.limit()) + 1,
            observed_at: wall,
        };

        warn!(
            anonymized_id = %report.anonymized_id,
            product_id = report.target.product_id,
            button_id = report.target.button_id,
            count = decision.count,
            retry_after_ms = decision.retry_after_ms(),
            "Review submission rate limit exceeded"
        );

        self.handler.on_violation(report);

        LimitOutcome::Denied {
            retry_after: decision.retry_after,
        }
    }

    /// Drop elapsed windows, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.windows.sweep_expired()
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            reports_dropped: self.handler.dropped_reports(),
            tracked_windows: self.windows.len(),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Axum adapter for `AbuseLimiter`, installed with `from_fn_with_state`
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<AbuseLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match limiter.evaluate(request.headers(), peer) {
        LimitOutcome::Denied { retry_after } => {
            LimiterError::RateLimited { retry_after }.into_response()
        }
        LimitOutcome::Bypass | LimitOutcome::Proceed => next.run(request).await,
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
