//! HTTP Handlers

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use kernel::error::app_error::AppError;
use kernel::id::RequestId;
use platform::rate_limit::{RateLimitPreset, RateLimitStore, apply_rate_limit, rate_limit_headers};

use crate::application::config::ChatConfig;
use crate::application::{
    ChunkStream, ModelAvailabilityService, RateLimitStatusUseCase, StreamChatUseCase, validate,
};
use crate::domain::moderation::Moderator;
use crate::domain::upstream::ChatUpstream;
use crate::domain::value_objects::{RequestStage, ValidatedQuery};
use crate::error::{ChatError, ChatResult, RateLimitRejection};
use crate::presentation::dto::{
    ChatResponse, ModelsResponse, RateLimitStatusQuery, RateLimitStatusResponse,
    RateLimitedChunk,
};
use crate::presentation::middleware::ClientIdentity;

/// Shared state for chat handlers
pub struct ChatAppState<U, L>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    pub upstream: Arc<U>,
    pub limiter: Arc<L>,
    pub moderator: Arc<Moderator>,
    pub availability: Arc<ModelAvailabilityService<U>>,
    pub config: Arc<ChatConfig>,
}

impl<U, L> ChatAppState<U, L>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    pub fn new(upstream: Arc<U>, limiter: Arc<L>, config: ChatConfig) -> ChatResult<Self> {
        let moderator = Moderator::new()
            .map_err(|e| ChatError::Internal(format!("moderation patterns: {e}")))?;
        let config = Arc::new(config);

        Ok(Self {
            availability: Arc::new(ModelAvailabilityService::new(
                upstream.clone(),
                config.clone(),
            )),
            upstream,
            limiter,
            moderator: Arc::new(moderator),
            config,
        })
    }

    fn stream_chat_use_case(&self) -> StreamChatUseCase<U, L> {
        StreamChatUseCase::new(
            self.upstream.clone(),
            self.limiter.clone(),
            self.moderator.clone(),
            self.config.clone(),
        )
    }
}

impl<U, L> Clone for ChatAppState<U, L>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            limiter: self.limiter.clone(),
            moderator: self.moderator.clone(),
            availability: self.availability.clone(),
            config: self.config.clone(),
        }
    }
}

// ============================================================================
// Chat
// ============================================================================

/// POST /api/chat/stream
pub async fn stream_chat<U, L>(
    State(state): State<ChatAppState<U, L>>,
    ClientIdentity(identity): ClientIdentity,
    body: Bytes,
) -> Response
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    let request_id = RequestId::new();
    let query = match parse_query(request_id, &body, &state.config) {
        Ok(query) => query,
        Err(e) => return e.into_response(),
    };

    match state
        .stream_chat_use_case()
        .execute(request_id, query, &identity)
        .await
    {
        Ok(chat) => event_stream(chat.chunks).into_response(),
        Err(ChatError::RateLimited(rejection)) => rate_limited_event_stream(&rejection),
        Err(e) => e.into_response(),
    }
}

/// POST /api/chat
pub async fn chat<U, L>(
    State(state): State<ChatAppState<U, L>>,
    ClientIdentity(identity): ClientIdentity,
    body: Bytes,
) -> ChatResult<Json<ChatResponse>>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    let request_id = RequestId::new();
    let query = parse_query(request_id, &body, &state.config)?;

    let completion = state
        .stream_chat_use_case()
        .complete(request_id, query, &identity)
        .await?;

    Ok(Json(completion.into()))
}

/// Parse and validate a chat body
fn parse_query(request_id: RequestId, body: &[u8], config: &ChatConfig) -> ChatResult<ValidatedQuery> {
    tracing::debug!(request_id = %request_id, stage = %RequestStage::Received, "Chat request stage");

    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| ChatError::Validation(vec!["Request body must be valid JSON".to_string()]))?;

    let query = validate(&payload, &config.allowed_models()).map_err(ChatError::Validation)?;

    tracing::debug!(request_id = %request_id, stage = %RequestStage::Validated, "Chat request stage");
    Ok(query)
}

/// `data: {"content","done"}` frames
fn event_stream(chunks: ChunkStream) -> impl IntoResponse {
    let events = chunks.map(|chunk| Event::default().json_data(&chunk));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// 429 with a single terminal SSE frame the client can render as-is
fn rate_limited_event_stream(rejection: &RateLimitRejection) -> Response {
    let frame = match serde_json::to_string(&RateLimitedChunk::from(rejection)) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(e) => {
            return ChatError::Internal(format!("rate limit frame: {e}")).into_response();
        }
    };

    tracing::info!(
        bucket = %rejection.bucket,
        used = rejection.used(),
        limit = rejection.limit(),
        "Chat stream rate limited"
    );

    let mut response = (StatusCode::TOO_MANY_REQUESTS, frame).into_response();
    let headers = response.headers_mut();
    headers.extend(rate_limit_headers(&rejection.result));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(rejection.reset_in_secs()));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

// ============================================================================
// Rate Limit Status
// ============================================================================

/// GET /api/rate-limit/status
pub async fn rate_limit_status<U, L>(
    State(state): State<ChatAppState<U, L>>,
    ClientIdentity(identity): ClientIdentity,
    params: Result<Query<RateLimitStatusQuery>, QueryRejection>,
) -> Result<Response, Response>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    let metered = apply_rate_limit(&*state.limiter, &state.config.status_limit, &identity).await?;
    let Query(params) = params.map_err(|e| AppError::from(e).into_response())?;

    let bucket = params
        .bucket
        .as_deref()
        .unwrap_or(RateLimitPreset::AiQuery.as_str())
        .parse::<RateLimitPreset>()
        .map_err(|e| ChatError::Validation(vec![e.to_string()]).into_response())?;

    let use_case = RateLimitStatusUseCase::new(state.limiter.clone(), state.config.clone());
    let status = use_case
        .execute(bucket, &identity)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        rate_limit_headers(&metered),
        Json(RateLimitStatusResponse::from(status)),
    )
        .into_response())
}

// ============================================================================
// Models
// ============================================================================

/// GET /api/models
pub async fn list_models<U, L>(State(state): State<ChatAppState<U, L>>) -> Json<ModelsResponse>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    let snapshot = state.availability.snapshot().await;
    Json(ModelsResponse::from(&*snapshot))
}
