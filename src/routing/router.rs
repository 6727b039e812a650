//! # Router Module
//!
//! This module builds the Axum router for Reviewgate.
//!
//! ## Routes
//!
//! - `POST <review path>`: guarded by the abuse limiter, forwarded upstream when allowed
//! - `GET /health`: unguarded, reports liveness and limiter counters
//!
//! The limiter is installed with `route_layer`, so it only runs for requests that
//! matched the review route; unknown paths get a plain 404 without being counted.

use super::handlers::{forward_review, health_handler};
use crate::AppState;
use crate::security::middleware::rate_limit_middleware;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub fn create_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route(&state.config.review_path, post(forward_review))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(guarded)
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
// Tests for the router are in the tests module
