//! HTTP helpers for rate limited endpoints

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use kernel::error::app_error::AppError;

use super::{RateLimitConfig, RateLimitResult, RateLimitStore};
use crate::client::Identity;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// `X-RateLimit-*` headers describing `result` (reset as Unix seconds)
pub fn rate_limit_headers(result: &RateLimitResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_at_secs()));
    headers
}

/// Ready-to-send 429 with `Retry-After` and `X-RateLimit-*`
pub fn too_many_requests(result: &RateLimitResult, message: &str) -> Response {
    let retry_after = result.reset_in_secs();
    let mut response = AppError::too_many_requests(message.to_string())
        .with_detail(format!(
            "Used {} of {} requests; window resets in {}s",
            result.count, result.limit, retry_after
        ))
        .with_retry_after(retry_after)
        .into_response();
    response.headers_mut().extend(rate_limit_headers(result));
    response
}

/// Consume one slot of `config` for `identity`.
///
/// Returns the result to proceed with, or the 429 response to send.
/// A failing store lets the request through: the limiter guards cost,
/// so an outage of the counter must not take the API down with it.
pub async fn apply_rate_limit<S>(
    store: &S,
    config: &RateLimitConfig,
    identity: &Identity,
) -> Result<RateLimitResult, Response>
where
    S: RateLimitStore + Sync,
{
    match store.try_consume(config, identity).await {
        Ok(result) if result.allowed => Ok(result),
        Ok(result) => Err(too_many_requests(&result, &config.message)),
        Err(e) => {
            tracing::warn!(
                bucket = %config.name,
                error = %e,
                "Rate limit store unavailable, allowing request"
            );
            Ok(RateLimitResult {
                allowed: true,
                count: 0,
                limit: config.max_requests,
                remaining: config.max_requests,
                reset_at_ms: 0,
                checked_at_ms: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{InMemoryRateLimiter, ManualClock};
    use axum::http::{StatusCode, header};
    use std::sync::Arc;

    fn blocked() -> RateLimitResult {
        RateLimitResult {
            allowed: false,
            count: 10,
            limit: 10,
            remaining: 0,
            reset_at_ms: 90_000,
            checked_at_ms: 60_000,
        }
    }

    #[test]
    fn test_rate_limit_headers() {
        let headers = rate_limit_headers(&blocked());
        assert_eq!(headers.get(X_RATELIMIT_LIMIT).unwrap(), "10");
        assert_eq!(headers.get(X_RATELIMIT_REMAINING).unwrap(), "0");
        assert_eq!(headers.get(X_RATELIMIT_RESET).unwrap(), "90");
    }

    #[test]
    fn test_too_many_requests_response() {
        let response = too_many_requests(&blocked(), "Slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
        assert_eq!(response.headers().get(X_RATELIMIT_LIMIT).unwrap(), "10");
    }

    #[tokio::test]
    async fn test_apply_rate_limit_blocks_when_exhausted() {
        let limiter = InMemoryRateLimiter::with_clock(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new("general", 2, 60);
        let who = Identity::ip("192.0.2.1");

        assert!(apply_rate_limit(&limiter, &config, &who).await.is_ok());
        let second = apply_rate_limit(&limiter, &config, &who).await.unwrap();
        assert_eq!(second.remaining, 0);

        let response = apply_rate_limit(&limiter, &config, &who).await.unwrap_err();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
    }
}
