//! # Reporting Module
//!
//! This module turns rate limit violations into durable, anonymized abuse reports.
//!
//! ## Features
//!
//! - **Anonymization**: Offending addresses are hashed per hour with a server-side salt
//! - **Correlation**: The referer tells which product and button were targeted
//! - **Pluggable Handling**: The limiter hands violations to a `ViolationHandler`
//! - **Off the Request Path**: `QueuedReporter` enqueues without waiting; a background
//!   worker performs the database upsert under a write timeout
//!
//! ## Failure Model
//!
//! Reporting is best effort. A full queue drops the report, a failing or slow
//! write is logged and discarded. None of this can turn a deny into an allow.

pub mod anonymize;
pub mod correlation;
pub mod store;

use self::correlation::ReportTarget;
use self::store::AbuseReportStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Everything needed to record one violation. Holds no raw address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationReport {
    pub anonymized_id: String,
    pub coarse_address: String,
    pub target: ReportTarget,
    /// `total_attempts` for a newly created row: the request count already known
    /// to exceed the limit (`limit + 1`)
    pub initial_attempts: i64,
    pub observed_at: DateTime<Utc>,
}

/// Errors raised while persisting a report
#[derive(Debug)]
pub enum ReportError {
    Database(sqlx::Error),
    Timeout(Duration),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Database(e) => write!(f, "Database error: {}", e),
            ReportError::Timeout(limit) => {
                write!(f, "Report write timed out after {}ms", limit.as_millis())
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Database(e) => Some(e),
            ReportError::Timeout(_) => None,
        }
    }
}

impl From<sqlx::Error> for ReportError {
    fn from(e: sqlx::Error) -> Self {
        ReportError::Database(e)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                         Public Traits                             ****//
///////////////////////////////////////////////////////////////////////////////

/// Side effect invoked by the limiter for every denied request.
///
/// Called on the request path, so implementations must not block.
pub trait ViolationHandler: Send + Sync {
    fn on_violation(&self, report: ViolationReport);

    /// Reports this handler had to discard
    fn dropped_reports(&self) -> u64 {
        0
    }
}

/// Handler that only logs; used when reporting is disabled
#[derive(Debug, Default)]
pub struct LogOnlyHandler;

impl ViolationHandler for LogOnlyHandler {
    fn on_violation(&self, report: ViolationReport) {
        info!(
            anonymized_id = %report.anonymized_id,
            product_id = report.target.product_id,
            button_id = report.target.button_id,
            "Rate limit violation (not persisted)"
        );
    }
}

/// Handler that queues reports for the background writer
#[derive(Debug)]
pub struct QueuedReporter {
    tx: mpsc::Sender<ViolationReport>,
    dropped: Arc<AtomicU64>,
}

impl QueuedReporter {
    /// Create the reporter and spawn its writer on the current runtime
    pub fn spawn(
        store: AbuseReportStore,
        capacity: usize,
        write_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_report_worker(store, rx, write_timeout));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Reports discarded because the queue was full or the worker had stopped
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ViolationHandler for QueuedReporter {
    fn on_violation(&self, report: ViolationReport) {
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(report)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    anonymized_id = %report.anonymized_id,
                    "Abuse report queue full, dropping report"
                );
            }
            Err(mpsc::error::TrySendError::Closed(report)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    anonymized_id = %report.anonymized_id,
                    "Abuse report worker stopped, dropping report"
                );
            }
        }
    }

    fn dropped_reports(&self) -> u64 {
        self.dropped()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Upsert one report, bounded by `write_timeout`
pub async fn write_report(
    store: &AbuseReportStore,
    report: &ViolationReport,
    write_timeout: Duration,
) -> Result<(), ReportError> {
    match tokio::time::timeout(write_timeout, store.upsert(report)).await {
        Ok(result) => result.map_err(ReportError::from),
        Err(_) => Err(ReportError::Timeout(write_timeout)),
    }
}

/// Drain the queue until every sender is dropped
pub async fn run_report_worker(
    store: AbuseReportStore,
    mut rx: mpsc::Receiver<ViolationReport>,
    write_timeout: Duration,
) {
    info!("Abuse report worker started");

    while let Some(report) = rx.recv().await {
        match write_report(&store, &report, write_timeout).await {
            Ok(()) => debug!(
                anonymized_id = %report.anonymized_id,
                product_id = report.target.product_id,
                button_id = report.target.button_id,
                "Abuse report recorded"
            ),
            Err(e) => error!(
                anonymized_id = %report.anonymized_id,
                error = %e,
                "Failed to record abuse report"
            ),
        }
    }

    info!("Abuse report worker stopped");
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
