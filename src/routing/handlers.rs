//! # Routing Handlers Module
//!
//! This module provides the HTTP handlers behind the router: forwarding of allowed
//! review submissions and the health endpoint.
//!
//! ## Request Flow
//!
//! 1. The abuse limiter middleware has already accepted the request
//! 2. Body, content type and query string are forwarded to the upstream review path
//! 3. Upstream status, content type and body are relayed to the caller
//!
//! ## Error Handling
//!
//! - Upstream unreachable or unreadable: 502 Bad Gateway
//! - Report database unreachable: `/health` answers `degraded`, submissions keep flowing

use crate::AppState;
use crate::security::LimiterStats;
use axum::{
    Json,
    body::Bytes,
    extract::{OriginalUri, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub database: &'static str,
    pub limiter: LimiterStats,
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Forward an allowed review submission to the upstream review service
pub async fn forward_review(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let mut target = format!("{}{}", state.config.upstream_url, state.config.review_path);
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut builder = state.http_client.post(&target).body(body);
    for name in [header::CONTENT_TYPE, header::ACCEPT, header::REFERER] {
        if let Some(value) = headers.get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    let upstream_start = Instant::now();

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            error!(
                request_id = %request_id,
                upstream = %target,
                error = %e,
                "Upstream request failed"
            );
            return bad_gateway();
        }
    };

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

    let response_body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            error!(
                request_id = %request_id,
                error = %e,
                "Failed to read upstream response body"
            );
            return bad_gateway();
        }
    };

    info!(
        request_id = %request_id,
        response_status = status.as_u16(),
        response_size_bytes = response_body.len(),
        upstream_duration_ms = upstream_start.elapsed().as_millis() as u64,
        "Review submission forwarded"
    );

    let mut relayed = (status, response_body).into_response();
    if let Some(content_type) = content_type {
        relayed.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    relayed
}

/// Liveness, report database reachability and limiter counters.
/// Rate limiting does not depend on the database, so a failing database only degrades.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let database_ok = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Abuse report database health check failed");
            false
        }
    };

    Json(HealthResponse {
        status: if database_ok { "ok" } else { "degraded" },
        timestamp: Utc::now(),
        database: if database_ok { "ok" } else { "unavailable" },
        limiter: state.limiter.stats(),
    })
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
// Handler tests run against a live router in the tests module
