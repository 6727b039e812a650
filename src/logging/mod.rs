//! # Logging Module
//!
//! This module sets up structured logging for Reviewgate.
//!
//! ## Features
//!
//! - **Structured Events**: `tracing` macros with fields such as `anonymized_id` and
//!   `retry_after_ms` throughout the crate
//! - **Filtering**: `EnvFilter` directives from `REVIEWGATE_LOG_LEVEL` or `RUST_LOG`
//! - **Privacy**: Raw client addresses are only emitted at debug level
//! - **Clean Output**: Events go to stderr so CLI tables and templates stay pipeable

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Calling it twice is harmless; the second call is ignored.
pub fn init_logging(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{}': {}, falling back to 'info'", directives, e);
        EnvFilter::new("info")
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
