//! Stream Chat Use Case
//!
//! Drives one chat request through its stages:
//!
//! `RECEIVED → VALIDATED → RATE_CHECKED → MODERATED → UPSTREAM_DISPATCHED →
//! STREAMING → {COMPLETED | FALLBACK | FAILED}`
//!
//! Gating failures (rate limits) are returned as errors before any stream
//! exists. Past that point the caller always gets a stream, and every stream
//! ends with exactly one chunk whose `done` is true: the upstream's own end,
//! a refusal, or a systems notice describing why the model could not answer.
//! `FAILED` is the one exception: if even the notice cannot be rendered the
//! stream closes without a terminal chunk.

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt::{self, Write};
use std::sync::Arc;

use kernel::id::RequestId;
use platform::client::Identity;
use platform::rate_limit::{RateLimitConfig, RateLimitResult, RateLimitStore};

use crate::application::config::ChatConfig;
use crate::domain::moderation::{Moderator, OUTPUT_REFUSAL_SUFFIX, OutputScreen, REFUSAL_MESSAGE};
use crate::domain::upstream::{ChatUpstream, UpstreamError, UpstreamRequest, UpstreamStream};
use crate::domain::value_objects::{
    ChatMessage, ChatRole, ContentPart, MessageContent, RequestStage, StreamChunk, ValidatedQuery,
};
use crate::error::{ChatError, ChatResult, RateLimitRejection};
use crate::infra::sse::{SseEvent, SseLineDecoder};

/// Chunks relayed to the caller
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// An admitted chat request
pub struct ChatStream {
    pub request_id: RequestId,
    /// Upstream model id the request resolved to
    pub model: String,
    pub chunks: ChunkStream,
}

/// A fully collected answer (non-streaming endpoint)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub request_id: RequestId,
    pub model: String,
    pub response: String,
}

/// Stream chat use case
pub struct StreamChatUseCase<U, L>
where
    U: ChatUpstream,
    L: RateLimitStore,
{
    upstream: Arc<U>,
    limiter: Arc<L>,
    moderator: Arc<Moderator>,
    config: Arc<ChatConfig>,
}

impl<U, L> StreamChatUseCase<U, L>
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    pub fn new(
        upstream: Arc<U>,
        limiter: Arc<L>,
        moderator: Arc<Moderator>,
        config: Arc<ChatConfig>,
    ) -> Self {
        Self {
            upstream,
            limiter,
            moderator,
            config,
        }
    }

    /// Gate the request and start streaming the answer
    pub async fn execute(
        &self,
        request_id: RequestId,
        query: ValidatedQuery,
        identity: &Identity,
    ) -> ChatResult<ChatStream> {
        let model = self
            .config
            .resolve_model(query.model.as_deref())
            .to_string();

        // Per-minute query budget is spent now; the daily upstream budget
        // is only looked at here and spent on dispatch.
        self.gate(&self.config.query_limit, identity, true).await?;
        self.gate(&self.config.upstream_limit, identity, false).await?;
        log_stage(request_id, RequestStage::RateChecked);

        let screen = self.moderator.screen(&query.query);
        if screen.is_offensive {
            tracing::warn!(
                request_id = %request_id,
                identity = %identity,
                category = ?screen.category.map(|c| c.as_str()),
                "Inbound query blocked by moderation"
            );
            let chunks = futures::stream::iter([StreamChunk::terminal(REFUSAL_MESSAGE)]).boxed();
            return Ok(ChatStream {
                request_id,
                model,
                chunks,
            });
        }
        log_stage(request_id, RequestStage::Moderated);

        let chunks = relay(
            RelayContext {
                request_id,
                upstream: self.upstream.clone(),
                limiter: self.limiter.clone(),
                moderator: self.moderator.clone(),
                config: self.config.clone(),
                identity: identity.clone(),
                model: model.clone(),
            },
            query,
        );

        Ok(ChatStream {
            request_id,
            model,
            chunks,
        })
    }

    /// Run the request to completion and join every chunk
    pub async fn complete(
        &self,
        request_id: RequestId,
        query: ValidatedQuery,
        identity: &Identity,
    ) -> ChatResult<ChatCompletion> {
        let ChatStream {
            request_id,
            model,
            chunks,
        } = self.execute(request_id, query, identity).await?;

        let response = chunks
            .fold(String::new(), |mut response, chunk| async move {
                response.push_str(&chunk.content);
                response
            })
            .await;

        Ok(ChatCompletion {
            request_id,
            model,
            response,
        })
    }

    async fn gate(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
        consume: bool,
    ) -> ChatResult<RateLimitResult> {
        let outcome = if consume {
            self.limiter.try_consume(config, identity).await
        } else {
            self.limiter.check(config, identity).await
        };

        match outcome {
            Ok(result) if result.allowed => Ok(result),
            Ok(result) => Err(ChatError::RateLimited(RateLimitRejection {
                bucket: config.name.to_string(),
                message: config.message.to_string(),
                result,
            })),
            Err(e) => {
                tracing::warn!(bucket = %config.name, error = %e, "Rate limit store unavailable, allowing request");
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
}

// ============================================================================
// Relay
// ============================================================================

struct RelayContext<U, L> {
    request_id: RequestId,
    upstream: Arc<U>,
    limiter: Arc<L>,
    moderator: Arc<Moderator>,
    config: Arc<ChatConfig>,
    identity: Identity,
    model: String,
}

fn relay<U, L>(ctx: RelayContext<U, L>, query: ValidatedQuery) -> ChunkStream
where
    U: ChatUpstream + Send + Sync + 'static,
    L: RateLimitStore + Send + Sync + 'static,
{
    stream! {
        let mut tracker = StageTracker::new(ctx.request_id);

        if !ctx.upstream.is_configured() {
            if let Some(chunk) = fallback(&mut tracker, &query.query, &UpstreamError::MissingApiKey) {
                yield chunk;
            }
            return;
        }

        match ctx.limiter.try_consume(&ctx.config.upstream_limit, &ctx.identity).await {
            Ok(result) if !result.allowed => {
                let reason = UpstreamError::Status {
                    status: 429,
                    message: "daily quota reached".to_string(),
                };
                if let Some(chunk) = fallback(&mut tracker, &query.query, &reason) {
                    yield chunk;
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(bucket = %ctx.config.upstream_limit.name, error = %e, "Rate limit store unavailable, allowing request");
            }
        }

        let request = UpstreamRequest::streaming(ctx.model.clone(), build_messages(&ctx.config, &query));
        tracker.advance(RequestStage::UpstreamDispatched);

        let mut body = match open_upstream(&*ctx.upstream, &ctx.config, request).await {
            Ok(body) => body,
            Err(e) => {
                if let Some(chunk) = fallback(&mut tracker, &query.query, &e) {
                    yield chunk;
                }
                return;
            }
        };
        tracker.advance(RequestStage::Streaming);

        let mut decoder = SseLineDecoder::new();
        let mut screen = OutputScreen::new(ctx.moderator.clone());
        let mut relayed = false;

        loop {
            let (events, ended) = match body.next().await {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) => {
                    if let Some(chunk) = fallback(&mut tracker, &query.query, &e) {
                        yield chunk;
                    }
                    return;
                }
                None => (decoder.finish(), true),
            };

            for event in events {
                match event {
                    SseEvent::Delta(text) => {
                        relayed = true;
                        if screen.push(&text).is_offensive {
                            tracing::warn!(request_id = %ctx.request_id, "Upstream output blocked by moderation");
                            tracker.advance(RequestStage::Completed);
                            yield StreamChunk::terminal(OUTPUT_REFUSAL_SUFFIX);
                            return;
                        }
                        yield StreamChunk::delta(text);
                    }
                    SseEvent::Finished => {
                        tracker.advance(RequestStage::Completed);
                        yield StreamChunk::done();
                        return;
                    }
                    SseEvent::Error(message) => {
                        if let Some(chunk) = fallback(&mut tracker, &query.query, &UpstreamError::Stream(message)) {
                            yield chunk;
                        }
                        return;
                    }
                }
            }

            if ended {
                if !relayed {
                    let reason = UpstreamError::Stream("stream ended without content".to_string());
                    if let Some(chunk) = fallback(&mut tracker, &query.query, &reason) {
                        yield chunk;
                    }
                } else {
                    tracker.advance(RequestStage::Completed);
                    yield StreamChunk::done();
                }
                return;
            }
        }
    }
    .boxed()
}

/// Open the upstream stream, retrying once on the configured backup when
/// the model has no live endpoint
async fn open_upstream<U>(
    upstream: &U,
    config: &ChatConfig,
    request: UpstreamRequest,
) -> Result<UpstreamStream, UpstreamError>
where
    U: ChatUpstream + Sync,
{
    let first = upstream.open_stream(&request).await;
    match first {
        Err(UpstreamError::NoEndpoints { model }) => match config.fallback_for(&model) {
            Some(backup) => {
                tracing::warn!(model = %model, backup = %backup, "No endpoints for model, retrying on backup");
                let retry = UpstreamRequest {
                    model: backup.to_string(),
                    ..request
                };
                upstream.open_stream(&retry).await
            }
            None => Err(UpstreamError::NoEndpoints { model }),
        },
        other => other,
    }
}

/// `[system, last N history, user turn]`
pub fn build_messages(config: &ChatConfig, query: &ValidatedQuery) -> Vec<ChatMessage> {
    let system_prompt = query
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or(&config.system_prompt);

    let history = &query.conversation_history;
    let skip = history.len().saturating_sub(config.history_limit);

    let user_content = match query.image.as_deref() {
        Some(image) => MessageContent::Parts(vec![
            ContentPart::text(query.query.clone()),
            ContentPart::image(image_data_url(image)),
        ]),
        None => MessageContent::Text(query.query.clone()),
    };

    let mut messages = Vec::with_capacity(history.len() - skip + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history[skip..].iter().cloned());
    messages.push(ChatMessage {
        role: ChatRole::User,
        content: user_content,
    });
    messages
}

/// Raw base64 is assumed to be JPEG
fn image_data_url(image: &str) -> String {
    if image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{image}")
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// Multi-line notice sent in place of a model answer
pub fn render_notice(query: &str, reason: &str) -> Result<String, fmt::Error> {
    let mut notice = String::new();
    writeln!(notice, "Systems notice")?;
    writeln!(notice)?;
    writeln!(
        notice,
        "The AI assistant is temporarily unavailable, so your message could not be answered right now."
    )?;
    writeln!(notice)?;
    writeln!(notice, "Your message: \"{query}\"")?;
    writeln!(notice, "Reason: {reason}")?;
    writeln!(notice)?;
    write!(notice, "Please try again in a few minutes.")?;
    Ok(notice)
}

/// Terminal notice chunk, or `None` once the request is FAILED
fn fallback(tracker: &mut StageTracker, query: &str, error: &UpstreamError) -> Option<StreamChunk> {
    tracing::warn!(request_id = %tracker.request_id, error = %error, "Falling back to systems notice");

    match render_notice(query, &error.reason()) {
        Ok(notice) => {
            tracker.advance(RequestStage::Fallback);
            Some(StreamChunk::terminal(notice))
        }
        Err(e) => {
            tracing::error!(request_id = %tracker.request_id, error = %e, "Failed to render systems notice");
            tracker.advance(RequestStage::Failed);
            None
        }
    }
}

fn log_stage(request_id: RequestId, stage: RequestStage) {
    tracing::debug!(request_id = %request_id, stage = %stage, "Chat request stage");
}

/// Tracks the stage of a running stream and reports abandoned ones
struct StageTracker {
    request_id: RequestId,
    stage: RequestStage,
}

impl StageTracker {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            stage: RequestStage::Moderated,
        }
    }

    fn advance(&mut self, stage: RequestStage) {
        self.stage = stage;
        if stage.is_terminal() {
            tracing::info!(request_id = %self.request_id, stage = %stage, "Chat request finished");
        } else {
            log_stage(self.request_id, stage);
        }
    }
}

impl Drop for StageTracker {
    fn drop(&mut self) {
        if !self.stage.is_terminal() {
            tracing::info!(
                request_id = %self.request_id,
                stage = %self.stage,
                "Client disconnected before the chat stream completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_order_and_history_window() {
        let config = ChatConfig::default().with_history_limit(2);
        let mut query = ValidatedQuery::new("Now?");
        query.conversation_history = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ];

        let messages = build_messages(&config, &query);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[0].content.text(), config.system_prompt);
        assert_eq!(messages[1].content.text(), "two");
        assert_eq!(messages[2].content.text(), "three");
        assert_eq!(messages[3], ChatMessage::user("Now?"));
    }

    #[test]
    fn test_build_messages_custom_prompt_and_image() {
        let config = ChatConfig::default();
        let mut query = ValidatedQuery::new("What is this?");
        query.system_prompt = Some("Answer in French".into());
        query.image = Some("iVBORw0KGgo=".into());

        let messages = build_messages(&config, &query);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("Answer in French"));
        assert_eq!(
            messages[1].content,
            MessageContent::Parts(vec![
                ContentPart::text("What is this?"),
                ContentPart::image("data:image/jpeg;base64,iVBORw0KGgo="),
            ])
        );
    }

    #[test]
    fn test_data_url_kept() {
        assert_eq!(
            image_data_url("data:image/png;base64,AAAA"),
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_render_notice_embeds_query_and_reason() {
        let notice = render_notice("Hello there", "the AI provider is not configured").unwrap();
        assert!(notice.contains("\"Hello there\""));
        assert!(notice.contains("Reason: the AI provider is not configured"));
        assert!(notice.lines().count() > 3);
    }

    #[test]
    fn test_fallback_is_terminal() {
        let mut tracker = StageTracker::new(RequestId::new());
        let chunk = fallback(&mut tracker, "Hi", &UpstreamError::MissingApiKey).unwrap();
        assert!(chunk.done);
        assert!(chunk.content.contains("Hi"));
        assert_eq!(tracker.stage, RequestStage::Fallback);
    }
}
