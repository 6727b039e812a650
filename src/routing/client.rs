//! # HTTP Client Module
//!
//! This module creates the HTTP client used to forward allowed review submissions
//! to the upstream review service.
//!
//! ## Features
//!
//! - **Timeouts**: Request and connect timeouts so a stuck upstream cannot pin requests
//! - **Connection Pooling**: Bounded idle connections per host
//! - **No Redirects**: Submissions are POSTs; redirects are relayed, never followed

use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::info;

/// Default request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Maximum number of idle connections per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 16;

/// Pool idle timeout in seconds
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const USER_AGENT: &str = concat!("Reviewgate/", env!("CARGO_PKG_VERSION"));

/// Configuration for the upstream HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_idle_connections_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_idle_connections_per_host: MAX_IDLE_CONNECTIONS_PER_HOST,
            pool_idle_timeout: Duration::from_secs(POOL_IDLE_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Create the upstream client with default settings
pub fn create_upstream_client() -> Result<Client, reqwest::Error> {
    create_upstream_client_with_config(HttpClientConfig::default())
}

pub fn create_upstream_client_with_config(config: HttpClientConfig) -> Result<Client, reqwest::Error> {
    let client = ClientBuilder::new()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.max_idle_connections_per_host)
        .build()?;

    info!(
        "Upstream HTTP client created - timeout: {}s, connect_timeout: {}s",
        config.request_timeout.as_secs(),
        config.connect_timeout.as_secs()
    );

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_upstream_client() {
        assert!(create_upstream_client().is_ok());
    }

    #[test]
    fn test_create_client_with_custom_timeouts() {
        let config = HttpClientConfig {
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(create_upstream_client_with_config(config).is_ok());
    }
}
