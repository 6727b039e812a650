//! # Security Module for Reviewgate
//!
//! This module holds the request-facing half of the abuse limiter: who is calling,
//! whether they are exempt, and how a rejected call is answered.
//!
//! ## Sub-modules
//!
//! - `fingerprint`: Client identity resolution from proxy headers and the socket address
//! - `allowlist`: Exempt addresses and inclusive address ranges
//! - `middleware`: `AbuseLimiter` and its axum middleware adapter
//! - `types`: `LimiterError` and its HTTP response

pub mod allowlist;
pub mod fingerprint;
pub mod middleware;
pub mod types;

pub use self::middleware::{AbuseLimiter, LimitOutcome, LimiterConfig, LimiterStats};
pub use self::types::LimiterError;
