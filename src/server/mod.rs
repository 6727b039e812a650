//! Server module for Reviewgate.
//!
//! This module wires configuration, the report database, the abuse limiter and the
//! router together and runs the HTTP server until a shutdown signal arrives.
//!
//! # Features
//!
//! - **Graceful Shutdown**: Ctrl-C / SIGTERM stop accepting connections, then the
//!   background tasks are drained within a bounded time
//! - **Report Writer**: Abuse reports are written by a background task fed by a bounded queue
//! - **Window Sweeper**: Expired rate windows are dropped periodically
//! - **Peer Addresses**: The service is served with connect info so the limiter can fall
//!   back to the socket address when no proxy header is present
//!
//! # Usage
//!
//! ```rust,ignore
//! let pool = initialize_database(&config.database_url).await?;
//! start_server(pool, config).await?;
//! ```

pub mod shutdown;

use self::shutdown::{ShutdownAwareTask, ShutdownCoordinator};
use crate::AppState;
use crate::env::AppConfig;
use crate::reporting::{LogOnlyHandler, QueuedReporter, ViolationHandler, store::AbuseReportStore};
use crate::routing::{client::create_upstream_client, router::create_router};
use crate::security::{AbuseLimiter, LimiterConfig, allowlist::AllowlistError};
use sqlx::sqlite::SqlitePool;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for draining background tasks on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Errors that stop the server from starting or running
#[derive(Debug)]
pub enum ServerError {
    Allowlist(AllowlistError),
    HttpClient(reqwest::Error),
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Allowlist(e) => write!(f, "Invalid allowlist: {}", e),
            ServerError::HttpClient(e) => write!(f, "Failed to create upstream client: {}", e),
            ServerError::Io(e) => write!(f, "Server I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Allowlist(e) => Some(e),
            ServerError::HttpClient(e) => Some(e),
            ServerError::Io(e) => Some(e),
        }
    }
}

impl From<AllowlistError> for ServerError {
    fn from(e: AllowlistError) -> Self {
        ServerError::Allowlist(e)
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        ServerError::HttpClient(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Start the review gate with graceful shutdown support
pub async fn start_server(pool: SqlitePool, config: AppConfig) -> Result<(), ServerError> {
    let shutdown_coordinator = ShutdownCoordinator::new();

    let limiter_config = LimiterConfig::from_app_config(&config)?;
    let handler: Arc<dyn ViolationHandler> = if config.reporting_enabled {
        let (reporter, worker) = QueuedReporter::spawn(
            AbuseReportStore::new(pool.clone()),
            config.report_queue_capacity,
            Duration::from_millis(config.report_write_timeout_ms),
        );
        shutdown_coordinator.track("report-writer", worker).await;
        Arc::new(reporter)
    } else {
        warn!("Abuse reporting disabled, violations will only be logged");
        Arc::new(LogOnlyHandler)
    };
    let limiter = Arc::new(AbuseLimiter::new(limiter_config, handler));

    let app_state = AppState {
        db: pool,
        http_client: create_upstream_client()?,
        config: config.clone(),
        limiter: limiter.clone(),
    };
    let app = create_router(app_state);

    spawn_window_sweeper(
        limiter,
        Duration::from_secs(config.window_sweep_secs),
        &shutdown_coordinator,
    )
    .await;

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let addr = listener.local_addr()?;
    info!("Reviewgate running on http://{}", addr);
    info!(
        "Guarding POST {} -> {}{}",
        config.review_path, config.upstream_url, config.review_path
    );

    let shutdown_for_server = shutdown_coordinator.clone();
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_for_server.wait_for_shutdown_signal().await;
    })
    .await;

    // also reached when serving failed, so background tasks always get the signal
    shutdown_coordinator.initiate_shutdown();
    shutdown_coordinator
        .wait_for_tasks_completion(SHUTDOWN_TIMEOUT)
        .await;

    result?;
    info!("Reviewgate shutdown complete");
    Ok(())
}

/// Periodically drop expired rate windows until shutdown
pub async fn spawn_window_sweeper(
    limiter: Arc<AbuseLimiter>,
    interval: Duration,
    shutdown_coordinator: &ShutdownCoordinator,
) {
    let mut shutdown_task = ShutdownAwareTask::new(shutdown_coordinator);

    let handle = tokio::spawn(async move {
        info!("Starting rate window sweeper");
        loop {
            if shutdown_task.wait_or_shutdown(interval).await {
                info!("Rate window sweeper shutting down");
                break;
            }

            let removed = limiter.sweep_expired();
            if removed > 0 {
                debug!(
                    removed,
                    remaining = limiter.stats().tracked_windows,
                    "Swept expired rate windows"
                );
            }
        }
    });

    shutdown_coordinator.track("window-sweeper", handle).await;
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::allowlist::Allowlist;
    use axum::http::{HeaderMap, HeaderValue};

    #[tokio::test]
    async fn test_window_sweeper_drops_expired_windows_and_stops() {
        let limiter = Arc::new(AbuseLimiter::new(
            LimiterConfig {
                window: Duration::from_millis(20),
                max_requests: 5,
                allowlist: Allowlist::default(),
                salt: "salt".to_string(),
                max_tracked_windows: 1000,
            },
            Arc::new(LogOnlyHandler),
        ));

        for i in 0..3 {
            let mut headers = HeaderMap::new();
            headers.insert(
                "x-client-ip",
                HeaderValue::from_str(&format!("198.51.100.{}", i)).unwrap(),
            );
            limiter.evaluate(&headers, None);
        }
        assert_eq!(limiter.stats().tracked_windows, 3);

        let coordinator = ShutdownCoordinator::new();
        spawn_window_sweeper(limiter.clone(), Duration::from_millis(10), &coordinator).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(limiter.stats().tracked_windows, 0);

        coordinator.initiate_shutdown();
        assert!(
            coordinator
                .wait_for_tasks_completion(Duration::from_secs(5))
                .await
        );
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::from(AllowlistError::InvalidAddress("nope".to_string()));
        assert!(err.to_string().contains("Invalid allowlist"));
    }
}
