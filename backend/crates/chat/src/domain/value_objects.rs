//! Domain Value Objects
//!
//! Immutable value types for the chat domain. Message types serialize in
//! the OpenAI-compatible shape the upstream expects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub const ALL: [ChatRole; 3] = [ChatRole::User, ChatRole::Assistant, ChatRole::System];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multi-part message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Message body: plain text or structured text + image parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text, images skipped
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// A chat query that passed validation and sanitization
///
/// Only [`crate::application::validate_query::validate`] builds these, so
/// every bound already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    pub query: String,
    /// Logical model name from the allow-list
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub conversation_history: Vec<ChatMessage>,
    /// Data URL or raw base64 image
    pub image: Option<String>,
}

impl ValidatedQuery {
    /// Minimal query (tests and internal callers)
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            model: None,
            system_prompt: None,
            conversation_history: Vec::new(),
            image: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// One SSE frame sent to the caller
///
/// After a chunk with `done == true` nothing else is sent on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    /// Terminal chunk with empty content
    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }

    /// Terminal chunk carrying a complete message (refusal, notice)
    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: true,
        }
    }
}

/// Lifecycle of one chat request
///
/// `Received → Validated → RateChecked → Moderated → UpstreamDispatched →
/// Streaming → {Completed | Fallback | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStage {
    Received,
    Validated,
    RateChecked,
    Moderated,
    UpstreamDispatched,
    Streaming,
    Completed,
    Fallback,
    Failed,
}

impl RequestStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestStage::Received => "RECEIVED",
            RequestStage::Validated => "VALIDATED",
            RequestStage::RateChecked => "RATE_CHECKED",
            RequestStage::Moderated => "MODERATED",
            RequestStage::UpstreamDispatched => "UPSTREAM_DISPATCHED",
            RequestStage::Streaming => "STREAMING",
            RequestStage::Completed => "COMPLETED",
            RequestStage::Fallback => "FALLBACK",
            RequestStage::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStage::Completed | RequestStage::Fallback | RequestStage::Failed
        )
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
