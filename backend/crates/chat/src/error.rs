//! Chat Error Types
//!
//! Chat-specific error variants that integrate with the unified
//! `kernel::error::AppError` system.

use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::rate_limit::{RateLimitResult, too_many_requests};
use thiserror::Error;

use crate::domain::upstream::UpstreamError;

/// Chat-specific result type alias
pub type ChatResult<T> = Result<T, ChatError>;

/// A gating rejection with everything a client needs to back off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    /// Bucket that refused the request
    pub bucket: String,
    pub message: String,
    pub result: RateLimitResult,
}

impl RateLimitRejection {
    pub fn used(&self) -> u32 {
        self.result.count
    }

    pub fn limit(&self) -> u32 {
        self.result.limit
    }

    pub fn reset_in_secs(&self) -> u64 {
        self.result.reset_in_secs()
    }
}

/// Chat-specific error variants
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed payload, one message per violation
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("{}", .0.message)]
    RateLimited(RateLimitRejection),

    /// Provider could not be set up; per-request upstream failures become
    /// fallback notices instead
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation(_) => ErrorKind::BadRequest,
            ChatError::RateLimited(_) => ErrorKind::TooManyRequests,
            ChatError::Upstream(_) => ErrorKind::BadGateway,
            ChatError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Convert to AppError
    pub fn to_app_error(&self) -> AppError {
        match self {
            ChatError::Validation(details) => AppError::validation(details.clone()),
            ChatError::RateLimited(rejection) => {
                AppError::too_many_requests(rejection.message.clone())
                    .with_retry_after(rejection.reset_in_secs())
            }
            _ => AppError::new(self.kind(), self.to_string()),
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            ChatError::RateLimited(rejection) => {
                tracing::info!(
                    bucket = %rejection.bucket,
                    used = rejection.used(),
                    limit = rejection.limit(),
                    "Chat request rate limited"
                );
            }
            ChatError::Validation(details) => {
                tracing::debug!(errors = ?details, "Chat request rejected");
            }
            other if other.kind().is_server_error() => {
                tracing::error!(error = %other, "Chat error");
            }
            other => {
                tracing::warn!(error = %other, "Chat error");
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        self.log();
        match self {
            ChatError::RateLimited(rejection) => {
                too_many_requests(&rejection.result, &rejection.message)
            }
            other => other.to_app_error().into_response(),
        }
    }
}

impl From<AppError> for ChatError {
    fn from(err: AppError) -> Self {
        ChatError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, header};

    fn rejection() -> RateLimitRejection {
        RateLimitRejection {
            bucket: "ai-query".into(),
            message: "Slow down".into(),
            result: RateLimitResult {
                allowed: false,
                count: 10,
                limit: 10,
                remaining: 0,
                reset_at_ms: 42_000,
                checked_at_ms: 12_000,
            },
        }
    }

    #[test]
    fn test_validation_maps_to_400_with_details() {
        let err = ChatError::Validation(vec!["query is required".into()]);
        let app = err.to_app_error();
        assert_eq!(app.status_code(), 400);
        assert_eq!(app.details(), ["query is required".to_string()]);
    }

    #[test]
    fn test_rate_limited_response_has_headers() {
        let response = ChatError::RateLimited(rejection()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
    }

    #[test]
    fn test_upstream_is_bad_gateway() {
        let err = ChatError::from(UpstreamError::MissingApiKey);
        assert_eq!(err.kind(), ErrorKind::BadGateway);
        assert!(err.kind().is_server_error());
    }
}
