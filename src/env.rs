//! Environment variable validation and configuration module for Reviewgate
//!
//! This module provides centralized validation and configuration management
//! for all environment variables used by the review abuse limiter.
//!
//! # Supported Environment Variables
//!
//! ## Database Configuration
//! - `REVIEWGATE_DB_URL`: Abuse report database URL (default: "sqlite://reviewgate.db")
//!
//! ## Server Configuration
//! - `REVIEWGATE_HOST`: Server bind address (default: "0.0.0.0")
//! - `REVIEWGATE_PORT`: Server port (default: "3000")
//! - `REVIEWGATE_UPSTREAM_URL`: Review service receiving allowed submissions
//!   (default: "http://127.0.0.1:3001")
//! - `REVIEWGATE_REVIEW_PATH`: Guarded submission path (default: "/api/trpc/review.create")
//!
//! ## Logging Configuration
//! - `RUST_LOG`: Standard Rust logging configuration
//! - `REVIEWGATE_LOG_LEVEL`: Application-specific log level override
//!
//! ## Rate Limiting Configuration
//! - `REVIEWGATE_RATE_WINDOW_MS`: Fixed window size in milliseconds (default: "3600000")
//! - `REVIEWGATE_RATE_MAX`: Requests allowed per window (default: "20")
//! - `REVIEWGATE_ALLOWLIST`: Comma separated addresses or `start-end` ranges exempt from limiting
//! - `REVIEWGATE_WINDOW_SWEEP_SECS`: Interval for dropping expired windows (default: "60")
//! - `REVIEWGATE_MAX_TRACKED_WINDOWS`: Clients tracked at once before new ones share an
//!   overflow window (default: "100000")
//!
//! ## Reporting Configuration
//! - `REVIEWGATE_HASH_SALT`: Secret mixed into anonymized ids (random per process if unset)
//! - `REVIEWGATE_REPORTING_ENABLED`: Persist abuse reports (default: "true")
//! - `REVIEWGATE_REPORT_QUEUE_CAPACITY`: Pending report queue size (default: "1024")
//! - `REVIEWGATE_REPORT_WRITE_TIMEOUT_MS`: Per report write timeout (default: "2000")
//!
//! # Usage
//!
//! ```rust,ignore
//! use reviewgate::env::{validate_environment, get_config};
//!
//! // Validate all environment variables at startup
//! let validation_result = validate_environment();
//! if let Err(errors) = validation_result {
//!     for error in errors {
//!         eprintln!("Environment validation error: {}: {}", error.variable, error.message);
//!     }
//!     std::process::exit(1);
//! }
//!
//! // Get validated configuration
//! let config = get_config();
//! println!("Server will bind to {}:{}", config.host, config.port);
//! ```

use crate::security::allowlist::Allowlist;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_DB_URL: &str = "sqlite://reviewgate.db";
pub const DEFAULT_LOG_LEVEL: &str = "reviewgate=info,tower_http=info";
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:3001";
pub const DEFAULT_REVIEW_PATH: &str = "/api/trpc/review.create";
pub const DEFAULT_RATE_WINDOW_MS: u64 = 3_600_000;
pub const DEFAULT_RATE_MAX: u32 = 20;
pub const DEFAULT_MAX_TRACKED_WINDOWS: usize = 100_000;

/// Environment validation errors
#[derive(Debug, Clone)]
pub struct EnvValidationError {
    pub variable: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

/// Severity level for environment validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    /// Critical errors that prevent application startup
    Critical,
    /// Warnings about missing optional variables or suboptimal configurations
    Warning,
    /// Informational messages about default values being used
    Info,
}

/// Validated application configuration derived from environment variables
#[derive(Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // Server
    pub host: String,
    pub port: u16,
    pub bind_address: SocketAddr,
    pub upstream_url: String,
    pub review_path: String,

    // Logging
    pub log_level: String,

    // Rate limiting
    pub rate_window_ms: u64,
    pub rate_max: u32,
    pub allowlist: String,
    pub window_sweep_secs: u64,
    pub max_tracked_windows: usize,

    // Reporting
    pub hash_salt: String,
    pub reporting_enabled: bool,
    pub report_queue_capacity: usize,
    pub report_write_timeout_ms: u64,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("bind_address", &self.bind_address)
            .field("upstream_url", &self.upstream_url)
            .field("review_path", &self.review_path)
            .field("log_level", &self.log_level)
            .field("rate_window_ms", &self.rate_window_ms)
            .field("rate_max", &self.rate_max)
            .field("allowlist", &self.allowlist)
            .field("window_sweep_secs", &self.window_sweep_secs)
            .field("max_tracked_windows", &self.max_tracked_windows)
            .field("hash_salt", &"<redacted>")
            .field("reporting_enabled", &self.reporting_enabled)
            .field("report_queue_capacity", &self.report_queue_capacity)
            .field("report_write_timeout_ms", &self.report_write_timeout_ms)
            .finish()
    }
}

impl Default for AppConfig {
    /// Defaults with a random salt, as used when no variables are set
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DB_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            review_path: DEFAULT_REVIEW_PATH.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            rate_window_ms: DEFAULT_RATE_WINDOW_MS,
            rate_max: DEFAULT_RATE_MAX,
            allowlist: String::new(),
            window_sweep_secs: 60,
            max_tracked_windows: DEFAULT_MAX_TRACKED_WINDOWS,
            hash_salt: uuid::Uuid::new_v4().to_string(),
            reporting_enabled: true,
            report_queue_capacity: 1024,
            report_write_timeout_ms: 2000,
        }
    }
}

/// Validate all environment variables and return configuration or errors
pub fn validate_environment() -> Result<AppConfig, Vec<EnvValidationError>> {
    validate_with(|name| env::var(name).ok())
}

/// Tracing filter directives from the process environment, or the default filter
pub fn log_level_from_env() -> String {
    configured_log_level(&|name: &str| env::var(name).ok())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// `REVIEWGATE_LOG_LEVEL` wins over `RUST_LOG`
fn configured_log_level<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup("REVIEWGATE_LOG_LEVEL").or_else(|| lookup("RUST_LOG"))
}

/// Validate configuration read through `lookup` instead of the process environment
pub fn validate_with<F>(lookup: F) -> Result<AppConfig, Vec<EnvValidationError>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Database configuration
    let database_url = lookup("REVIEWGATE_DB_URL").unwrap_or_else(|| {
        warnings.push(EnvValidationError {
            variable: "REVIEWGATE_DB_URL".to_string(),
            message: format!("Using default database URL '{}'", DEFAULT_DB_URL),
            severity: ErrorSeverity::Info,
        });
        DEFAULT_DB_URL.to_string()
    });

    // Server configuration
    let host = lookup("REVIEWGATE_HOST").unwrap_or_else(|| {
        warnings.push(EnvValidationError {
            variable: "REVIEWGATE_HOST".to_string(),
            message: "Using default host '0.0.0.0'".to_string(),
            severity: ErrorSeverity::Info,
        });
        "0.0.0.0".to_string()
    });

    let host_ip = match IpAddr::from_str(&host) {
        Ok(ip) => Some(ip),
        Err(_) => {
            errors.push(EnvValidationError {
                variable: "REVIEWGATE_HOST".to_string(),
                message: format!("Invalid IP address: {}", host),
                severity: ErrorSeverity::Critical,
            });
            None
        }
    };

    let port = match lookup("REVIEWGATE_PORT") {
        Some(port_str) => match port_str.parse::<u16>() {
            Ok(port) => {
                if port < 1024 && port != 0 {
                    warnings.push(EnvValidationError {
                        variable: "REVIEWGATE_PORT".to_string(),
                        message: format!(
                            "Using privileged port {}, may require root privileges",
                            port
                        ),
                        severity: ErrorSeverity::Warning,
                    });
                }
                port
            }
            Err(_) => {
                errors.push(EnvValidationError {
                    variable: "REVIEWGATE_PORT".to_string(),
                    message: format!("Invalid port number: {}", port_str),
                    severity: ErrorSeverity::Critical,
                });
                3000 // fallback
            }
        },
        None => {
            warnings.push(EnvValidationError {
                variable: "REVIEWGATE_PORT".to_string(),
                message: "Using default port 3000".to_string(),
                severity: ErrorSeverity::Info,
            });
            3000
        }
    };

    let bind_address = SocketAddr::new(
        host_ip.unwrap_or(IpAddr::from([0, 0, 0, 0])),
        port,
    );

    let upstream_url = lookup("REVIEWGATE_UPSTREAM_URL").unwrap_or_else(|| {
        warnings.push(EnvValidationError {
            variable: "REVIEWGATE_UPSTREAM_URL".to_string(),
            message: format!("Using default upstream '{}'", DEFAULT_UPSTREAM_URL),
            severity: ErrorSeverity::Info,
        });
        DEFAULT_UPSTREAM_URL.to_string()
    });

    match Url::parse(&upstream_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => errors.push(EnvValidationError {
            variable: "REVIEWGATE_UPSTREAM_URL".to_string(),
            message: format!("Invalid upstream URL: {}", upstream_url),
            severity: ErrorSeverity::Critical,
        }),
    }
    let upstream_url = upstream_url.trim_end_matches('/').to_string();

    let review_path = lookup("REVIEWGATE_REVIEW_PATH").unwrap_or_else(|| {
        warnings.push(EnvValidationError {
            variable: "REVIEWGATE_REVIEW_PATH".to_string(),
            message: format!("Using default review path '{}'", DEFAULT_REVIEW_PATH),
            severity: ErrorSeverity::Info,
        });
        DEFAULT_REVIEW_PATH.to_string()
    });

    if !review_path.starts_with('/') {
        errors.push(EnvValidationError {
            variable: "REVIEWGATE_REVIEW_PATH".to_string(),
            message: format!("Review path must start with '/': {}", review_path),
            severity: ErrorSeverity::Critical,
        });
    }

    // Logging configuration
    let log_level = configured_log_level(&lookup).unwrap_or_else(|| {
        warnings.push(EnvValidationError {
            variable: "RUST_LOG/REVIEWGATE_LOG_LEVEL".to_string(),
            message: format!("Using default log level '{}'", DEFAULT_LOG_LEVEL),
            severity: ErrorSeverity::Info,
        });
        DEFAULT_LOG_LEVEL.to_string()
    });

    // Rate limiting configuration
    let rate_window_ms = parse_env_var_with_default(
        &lookup,
        "REVIEWGATE_RATE_WINDOW_MS",
        DEFAULT_RATE_WINDOW_MS,
        &mut warnings,
    );
    if rate_window_ms == 0 {
        errors.push(EnvValidationError {
            variable: "REVIEWGATE_RATE_WINDOW_MS".to_string(),
            message: "Rate window must be greater than zero".to_string(),
            severity: ErrorSeverity::Critical,
        });
    }

    let rate_max =
        parse_env_var_with_default(&lookup, "REVIEWGATE_RATE_MAX", DEFAULT_RATE_MAX, &mut warnings);
    if rate_max == 0 {
        errors.push(EnvValidationError {
            variable: "REVIEWGATE_RATE_MAX".to_string(),
            message: "Rate limit must be greater than zero".to_string(),
            severity: ErrorSeverity::Critical,
        });
    }

    let allowlist = lookup("REVIEWGATE_ALLOWLIST").unwrap_or_default();
    if let Err(e) = Allowlist::parse(&allowlist) {
        errors.push(EnvValidationError {
            variable: "REVIEWGATE_ALLOWLIST".to_string(),
            message: e.to_string(),
            severity: ErrorSeverity::Critical,
        });
    }

    let window_sweep_secs =
        parse_env_var_with_default(&lookup, "REVIEWGATE_WINDOW_SWEEP_SECS", 60, &mut warnings)
            .max(1);

    let max_tracked_windows = parse_env_var_with_default(
        &lookup,
        "REVIEWGATE_MAX_TRACKED_WINDOWS",
        DEFAULT_MAX_TRACKED_WINDOWS,
        &mut warnings,
    );
    if max_tracked_windows == 0 {
        errors.push(EnvValidationError {
            variable: "REVIEWGATE_MAX_TRACKED_WINDOWS".to_string(),
            message: "At least one rate window must be trackable".to_string(),
            severity: ErrorSeverity::Critical,
        });
    }

    // Reporting configuration
    let hash_salt = match lookup("REVIEWGATE_HASH_SALT") {
        Some(salt) if salt.trim().is_empty() => {
            errors.push(EnvValidationError {
                variable: "REVIEWGATE_HASH_SALT".to_string(),
                message: "Hash salt is set but empty".to_string(),
                severity: ErrorSeverity::Critical,
            });
            String::new()
        }
        Some(salt) => salt,
        None => {
            warnings.push(EnvValidationError {
                variable: "REVIEWGATE_HASH_SALT".to_string(),
                message: "No hash salt configured, using a random one. Anonymized ids will not \
                          match across restarts"
                    .to_string(),
                severity: ErrorSeverity::Warning,
            });
            uuid::Uuid::new_v4().to_string()
        }
    };

    let reporting_enabled = parse_bool_env_var_with_default(
        &lookup,
        "REVIEWGATE_REPORTING_ENABLED",
        true,
        &mut warnings,
    );

    let report_queue_capacity = parse_env_var_with_default(
        &lookup,
        "REVIEWGATE_REPORT_QUEUE_CAPACITY",
        1024usize,
        &mut warnings,
    )
    .max(1);

    let report_write_timeout_ms = parse_env_var_with_default(
        &lookup,
        "REVIEWGATE_REPORT_WRITE_TIMEOUT_MS",
        2000u64,
        &mut warnings,
    )
    .max(1);

    // Add all warnings to errors for reporting
    errors.extend(warnings);

    // Check if we have any critical errors
    let has_critical_errors = errors.iter().any(|e| e.severity == ErrorSeverity::Critical);

    if has_critical_errors {
        return Err(errors);
    }

    // Log non-critical issues
    for error in &errors {
        match error.severity {
            ErrorSeverity::Warning => warn!("{}: {}", error.variable, error.message),
            ErrorSeverity::Info => info!("{}: {}", error.variable, error.message),
            ErrorSeverity::Critical => {} // Already handled above
        }
    }

    Ok(AppConfig {
        database_url,
        host,
        port,
        bind_address,
        upstream_url,
        review_path,
        log_level,
        rate_window_ms,
        rate_max,
        allowlist,
        window_sweep_secs,
        max_tracked_windows,
        hash_salt,
        reporting_enabled,
        report_queue_capacity,
        report_write_timeout_ms,
    })
}

/// Get the validated configuration, exiting the process if validation fails
pub fn get_config() -> AppConfig {
    match validate_environment() {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Environment validation failed:");
            for error in errors {
                match error.severity {
                    ErrorSeverity::Critical => {
                        eprintln!("CRITICAL - {}: {}", error.variable, error.message)
                    }
                    ErrorSeverity::Warning => {
                        eprintln!("WARNING - {}: {}", error.variable, error.message)
                    }
                    ErrorSeverity::Info => {
                        eprintln!("INFO - {}: {}", error.variable, error.message)
                    }
                }
            }
            std::process::exit(1);
        }
    }
}

/// Print environment validation results in a user-friendly format
pub fn print_validation_results(result: &Result<AppConfig, Vec<EnvValidationError>>) {
    match result {
        Ok(config) => {
            info!("Environment validation successful");
            info!("Configuration:");
            info!("  Database URL: {}", config.database_url);
            info!("  Server: {}", config.bind_address);
            info!("  Upstream: {}{}", config.upstream_url, config.review_path);
            info!("  Log Level: {}", config.log_level);
            info!(
                "  Rate Limit: {} requests per {}ms",
                config.rate_max, config.rate_window_ms
            );
            info!("  Max Tracked Windows: {}", config.max_tracked_windows);
            if !config.allowlist.is_empty() {
                info!("  Allowlist: {}", config.allowlist);
            }
            info!("  Reporting Enabled: {}", config.reporting_enabled);
            if config.reporting_enabled {
                info!(
                    "  Report Queue: {} entries, {}ms write timeout",
                    config.report_queue_capacity, config.report_write_timeout_ms
                );
            }
        }
        Err(errors) => {
            let critical_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Critical)
                .count();
            let warning_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Warning)
                .count();
            let info_count = errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Info)
                .count();

            if critical_count > 0 {
                eprintln!(
                    "Environment validation failed with {} critical error(s), {} warning(s), {} info message(s):",
                    critical_count, warning_count, info_count
                );
            } else {
                println!(
                    "Environment validation completed with {} warning(s), {} info message(s):",
                    warning_count, info_count
                );
            }

            for error in errors {
                let prefix = match error.severity {
                    ErrorSeverity::Critical => "❌ CRITICAL",
                    ErrorSeverity::Warning => "⚠️  WARNING",
                    ErrorSeverity::Info => "ℹ️  INFO",
                };
                println!("  {} - {}: {}", prefix, error.variable, error.message);
            }
        }
    }
}

/// Generate example environment configuration file
pub fn generate_env_example() -> String {
    format!(
        r#"# Reviewgate Environment Configuration
# Copy this file to .env and customize the values for your deployment

# =============================================================================
# Database Configuration
# =============================================================================

# Abuse report database URL
# Default: {db_url}
# Examples:
#   REVIEWGATE_DB_URL=sqlite://reviewgate.db
#   REVIEWGATE_DB_URL=sqlite:///var/lib/reviewgate/reviewgate.db
REVIEWGATE_DB_URL={db_url}

# =============================================================================
# Server Configuration
# =============================================================================

# Server bind address
# Default: 0.0.0.0 (bind to all interfaces)
REVIEWGATE_HOST=0.0.0.0

# Server port
# Default: 3000
# Note: Ports below 1024 may require root privileges
REVIEWGATE_PORT=3000

# Review service receiving allowed submissions
# Default: {upstream}
REVIEWGATE_UPSTREAM_URL={upstream}

# Guarded review submission path
# Default: {review_path}
REVIEWGATE_REVIEW_PATH={review_path}

# =============================================================================
# Logging Configuration
# =============================================================================

# Log level configuration
# Default: {log_level}
# Examples:
#   RUST_LOG=debug                               # Everything at debug level
#   RUST_LOG=reviewgate=debug,tower_http=info    # Custom per-module levels
#   REVIEWGATE_LOG_LEVEL=info                    # Override for reviewgate only
RUST_LOG={log_level}

# =============================================================================
# Rate Limiting Configuration
# =============================================================================

# Fixed window size in milliseconds
# Default: {window_ms} (one hour)
REVIEWGATE_RATE_WINDOW_MS={window_ms}

# Requests allowed per client within one window
# Default: {rate_max}
# Note: fixed windows admit up to twice this many requests across a window boundary
REVIEWGATE_RATE_MAX={rate_max}

# Clients exempt from limiting: single addresses or inclusive ranges
# Examples:
#   REVIEWGATE_ALLOWLIST=127.0.0.1
#   REVIEWGATE_ALLOWLIST=10.0.0.0-10.0.0.255,192.168.1.20
# REVIEWGATE_ALLOWLIST=

# Interval in seconds for dropping expired windows
# Default: 60
REVIEWGATE_WINDOW_SWEEP_SECS=60

# Upper bound on clients tracked at once; clients first seen while the table is
# full share a single overflow window until expired windows are swept
# Default: {max_windows}
REVIEWGATE_MAX_TRACKED_WINDOWS={max_windows}

# =============================================================================
# Reporting Configuration
# =============================================================================

# Secret mixed into anonymized client ids
# Without it a random salt is generated at start-up and ids do not survive restarts
# Generate with: openssl rand -hex 32
# REVIEWGATE_HASH_SALT=your-secret-salt

# Persist abuse reports to the database
# Default: true
REVIEWGATE_REPORTING_ENABLED=true

# Pending report queue size; reports beyond it are dropped
# Default: 1024
REVIEWGATE_REPORT_QUEUE_CAPACITY=1024

# Timeout in milliseconds for a single report write
# Default: 2000
REVIEWGATE_REPORT_WRITE_TIMEOUT_MS=2000
"#,
        db_url = DEFAULT_DB_URL,
        upstream = DEFAULT_UPSTREAM_URL,
        review_path = DEFAULT_REVIEW_PATH,
        log_level = DEFAULT_LOG_LEVEL,
        window_ms = DEFAULT_RATE_WINDOW_MS,
        rate_max = DEFAULT_RATE_MAX,
        max_windows = DEFAULT_MAX_TRACKED_WINDOWS,
    )
}

/// Helper function to parse environment variable with default value
fn parse_env_var_with_default<T, F>(
    lookup: &F,
    var_name: &str,
    default: T,
    warnings: &mut Vec<EnvValidationError>,
) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Clone + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match lookup(var_name) {
        Some(value_str) => match value_str.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!(
                        "Invalid value '{}': {}. Using default: {}",
                        value_str, e, default
                    ),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
        },
        None => {
            warnings.push(EnvValidationError {
                variable: var_name.to_string(),
                message: format!("Using default value: {}", default),
                severity: ErrorSeverity::Info,
            });
            default
        }
    }
}

/// Helper function to parse boolean environment variable with default value
fn parse_bool_env_var_with_default<F>(
    lookup: &F,
    var_name: &str,
    default: bool,
    warnings: &mut Vec<EnvValidationError>,
) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var_name) {
        Some(value_str) => match value_str.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!(
                        "Invalid boolean value '{}'. Using default: {}",
                        value_str, default
                    ),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
        },
        None => {
            warnings.push(EnvValidationError {
                variable: var_name.to_string(),
                message: format!("Using default value: {}", default),
                severity: ErrorSeverity::Info,
            });
            default
        }
    }
}
