//! Chat Middleware
//!
//! Caller identity extraction and per-route rate limiting.

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use platform::client::{Identity, resolve_identity};
use platform::rate_limit::{RateLimitConfig, RateLimitStore, apply_rate_limit, rate_limit_headers};

/// Rate limit identity of the caller
///
/// Uses the socket address when the server was started with connect info;
/// otherwise only headers identify the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub Identity);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let direct_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        Ok(Self(resolve_identity(&parts.headers, direct_ip)))
    }
}

/// Middleware state
pub struct RateLimitMiddlewareState<L>
where
    L: RateLimitStore + Send + Sync + 'static,
{
    pub limiter: Arc<L>,
    pub bucket: Arc<RateLimitConfig>,
}

impl<L> Clone for RateLimitMiddlewareState<L>
where
    L: RateLimitStore + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

/// Middleware that spends one slot of the configured bucket per request
///
/// Admitted responses carry `X-RateLimit-*`; rejected ones are a 429
/// without reaching the handler.
pub async fn enforce_rate_limit<L>(
    State(state): State<RateLimitMiddlewareState<L>>,
    req: Request<Body>,
    next: Next,
) -> Response
where
    L: RateLimitStore + Send + Sync + 'static,
{
    let direct_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let identity = resolve_identity(req.headers(), direct_ip);

    match apply_rate_limit(&*state.limiter, &state.bucket, &identity).await {
        Ok(result) => {
            let mut response = next.run(req).await;
            response.headers_mut().extend(rate_limit_headers(&result));
            response
        }
        Err(rejection) => rejection,
    }
}
