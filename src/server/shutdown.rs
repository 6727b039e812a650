//! Graceful shutdown coordinator for Reviewgate
//!
//! Signals background tasks (window sweeper, report writer) to stop and waits,
//! bounded by a timeout, for the tasks it tracks to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Shutdown coordinator that manages graceful shutdown of all services
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    /// Atomic flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Broadcast sender for shutdown signals
    shutdown_tx: broadcast::Sender<()>,
    /// Background tasks awaited on shutdown
    tasks: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Create a shutdown receiver for background tasks
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            info!("Initiating graceful shutdown...");
            if let Err(e) = self.shutdown_tx.send(()) {
                // no subscribers left, nothing to notify
                warn!("Failed to send shutdown signal: {}", e);
            }
        }
    }

    /// Register a background task to be awaited on shutdown
    pub async fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().await.push((name, handle));
    }

    /// Wait for shutdown signals (SIGTERM, SIGINT, or manual trigger)
    pub async fn wait_for_shutdown_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let mut manual = self.subscribe();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
            _ = manual.recv() => {
                info!("Shutdown requested");
            }
        }

        self.initiate_shutdown();
    }

    /// Wait for tracked tasks to finish. Returns false if the timeout was hit.
    pub async fn wait_for_tasks_completion(&self, timeout: Duration) -> bool {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().await);
        info!(
            "Waiting up to {}s for {} background task(s) to complete...",
            timeout.as_secs(),
            tasks.len()
        );

        let join_all = async {
            for (name, handle) in tasks {
                match handle.await {
                    Ok(()) => info!(task = name, "Background task stopped"),
                    Err(e) => error!(task = name, error = %e, "Background task failed"),
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                info!("Background tasks completed shutdown");
                true
            }
            Err(_) => {
                warn!("Shutdown timeout reached, some tasks may not have completed gracefully");
                false
            }
        }
    }
}

/// Background task wrapper that handles shutdown signals
pub struct ShutdownAwareTask {
    shutdown_rx: broadcast::Receiver<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl ShutdownAwareTask {
    /// Create a new shutdown-aware task
    pub fn new(coordinator: &ShutdownCoordinator) -> Self {
        Self {
            shutdown_rx: coordinator.subscribe(),
            shutdown_initiated: coordinator.shutdown_initiated.clone(),
        }
    }

    /// Wait for either a shutdown signal or the specified duration.
    /// Returns true when shutdown was requested.
    pub async fn wait_or_shutdown(&mut self, duration: Duration) -> bool {
        if self.shutdown_initiated.load(Ordering::SeqCst) {
            return true;
        }
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
