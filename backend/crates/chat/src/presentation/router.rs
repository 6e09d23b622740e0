//! Chat Router

use axum::extract::DefaultBodyLimit;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use platform::rate_limit::{InMemoryRateLimiter, RateLimitStore};

use crate::application::config::ChatConfig;
use crate::domain::upstream::ChatUpstream;
use crate::error::ChatResult;
use crate::infra::openrouter::{OpenRouterClient, OpenRouterConfig};
use crate::presentation::handlers::{self, ChatAppState};
use crate::presentation::middleware::{RateLimitMiddlewareState, enforce_rate_limit};

/// Create the Chat router backed by OpenRouter and the in-memory limiter
pub fn chat_router(
    openrouter: OpenRouterConfig,
    limiter: Arc<InMemoryRateLimiter>,
    config: ChatConfig,
) -> ChatResult<Router> {
    let upstream = OpenRouterClient::new(openrouter)?;
    chat_router_generic(upstream, limiter, config)
}

/// Create a generic Chat router for any upstream and limiter implementation
pub fn chat_router_generic<U, L>(upstream: U, limiter: Arc<L>, config: ChatConfig) -> ChatResult<Router>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    let state = ChatAppState::new(Arc::new(upstream), limiter, config)?;

    let general = RateLimitMiddlewareState {
        limiter: state.limiter.clone(),
        bucket: Arc::new(state.config.general_limit.clone()),
    };
    let body_limit = state.config.body_limit;

    Ok(Router::new()
        .route("/chat/stream", post(handlers::stream_chat::<U, L>))
        .route("/chat", post(handlers::chat::<U, L>))
        .route(
            "/rate-limit/status",
            get(handlers::rate_limit_status::<U, L>),
        )
        .route(
            "/models",
            get(handlers::list_models::<U, L>)
                .layer(middleware::from_fn_with_state(general, enforce_rate_limit::<L>)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state))
}
