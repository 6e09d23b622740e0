//! Upstream Provider Interface
//!
//! The chat pipeline talks to the LLM aggregation service only through
//! [`ChatUpstream`]. Infrastructure provides the HTTP implementation; tests
//! provide scripted ones.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

use super::value_objects::ChatMessage;

/// Raw upstream response body, still SSE-framed
pub type UpstreamStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Outbound chat completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamRequest {
    /// Concrete upstream model identifier
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl UpstreamRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

/// Upstream failure
///
/// None of these reach a chat caller as an HTTP error; the orchestrator
/// turns every one of them into a systems notice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream API key is not configured")]
    MissingApiKey,

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The provider has no route serving this model right now
    #[error("No endpoints found for model {model}")]
    NoEndpoints { model: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Failure after the stream started (disconnect or error payload)
    #[error("Stream error: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// Human-readable reason embedded in the systems notice
    pub fn reason(&self) -> String {
        match self {
            UpstreamError::MissingApiKey => "the AI provider is not configured".to_string(),
            UpstreamError::Status { status, .. } => {
                format!("the AI provider responded with status {status}")
            }
            UpstreamError::NoEndpoints { model } => {
                format!("no provider endpoint is currently serving {model}")
            }
            UpstreamError::Network(_) => "the AI provider could not be reached".to_string(),
            UpstreamError::Stream(_) => "the connection to the AI provider was interrupted".to_string(),
        }
    }
}

/// LLM aggregation service
#[trait_variant::make(ChatUpstream: Send)]
pub trait LocalChatUpstream {
    /// Whether credentials are present; without them nothing is dispatched
    fn is_configured(&self) -> bool;

    /// Start a streaming completion. Returns once response headers arrived.
    async fn open_stream(&self, request: &UpstreamRequest)
    -> Result<UpstreamStream, UpstreamError>;

    /// Minimal non-streaming request telling whether `model` answers
    async fn probe(&self, model: &str) -> Result<bool, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_for_completions_api() {
        let request = UpstreamRequest::streaming(
            "openai/gpt-4o",
            vec![ChatMessage::system("Be brief"), ChatMessage::user("Hi")],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "openai/gpt-4o",
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "Hi"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn test_reason_hides_internal_detail() {
        let err = UpstreamError::Network("dns error: connect refused 10.0.0.3".into());
        assert!(!err.reason().contains("10.0.0.3"));
        assert!(UpstreamError::Status {
            status: 503,
            message: "busy".into()
        }
        .reason()
        .contains("503"));
    }
}
