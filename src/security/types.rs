use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;
use std::time::Duration;

/// Errors the limiter turns into HTTP responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    RateLimited { retry_after: Duration },
}

impl LimiterError {
    /// Whole seconds for the `Retry-After` header, rounded up and at least 1
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            LimiterError::RateLimited { retry_after } => {
                let millis = retry_after.as_millis() as u64;
                millis.div_ceil(1000).max(1)
            }
        }
    }
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterError::RateLimited { retry_after } => {
                write!(f, "Rate limited, retry after {}ms", retry_after.as_millis())
            }
        }
    }
}

impl std::error::Error for LimiterError {}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let retry_secs = self.retry_after_secs();
        match self {
            LimiterError::RateLimited { retry_after } => {
                let body = serde_json::json!({
                    "error": {
                        "code": "E-RATE-LIMITED",
                        "message": "Too many requests. Please try again later.",
                        "details": {
                            "retryAfterMs": retry_after.as_millis() as u64
                        }
                    }
                });

                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up_to_whole_seconds() {
        let err = LimiterError::RateLimited {
            retry_after: Duration::from_millis(50_001),
        };
        assert_eq!(err.retry_after_secs(), 51);

        let exact = LimiterError::RateLimited {
            retry_after: Duration::from_secs(50),
        };
        assert_eq!(exact.retry_after_secs(), 50);

        let tiny = LimiterError::RateLimited {
            retry_after: Duration::from_millis(0),
        };
        assert_eq!(tiny.retry_after_secs(), 1);
    }

    #[test]
    fn test_rate_limited_response() {
        let response = LimiterError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }
}
