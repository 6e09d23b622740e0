//! Application Configuration
//!
//! Configuration for the Chat application layer.

use std::collections::HashMap;
use std::time::Duration;

use platform::rate_limit::{RateLimitConfig, RateLimitPreset};

/// Default system prompt when the caller supplies none
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant on a company website. \
Answer clearly and concisely. If you do not know something, say so.";

/// A logical model name exposed to callers and the upstream id it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub name: String,
    pub upstream_id: String,
}

impl ModelRoute {
    pub fn new(name: impl Into<String>, upstream_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upstream_id: upstream_id.into(),
        }
    }
}

/// Chat application configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Allow-listed logical models, in listing order
    pub models: Vec<ModelRoute>,
    /// Upstream id used when the caller names no model
    pub default_model: String,
    /// Upstream id -> backup upstream id, tried once on "no endpoints"
    pub fallback_models: HashMap<String, String>,
    pub system_prompt: String,
    /// History messages forwarded upstream (most recent kept)
    pub history_limit: usize,
    /// Per-identity chat queries
    pub query_limit: RateLimitConfig,
    /// Per-identity upstream dispatches
    pub upstream_limit: RateLimitConfig,
    /// Metering of the rate limit status endpoint
    pub status_limit: RateLimitConfig,
    /// Metering of miscellaneous endpoints (model listing)
    pub general_limit: RateLimitConfig,
    /// Models probed concurrently per batch
    pub probe_batch_size: usize,
    /// Pause between probe batches
    pub probe_batch_pause: Duration,
    /// How long a probe result is served from cache
    pub availability_ttl: Duration,
    /// Max request body (a 10 MiB image plus the rest of the payload)
    pub body_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let models = vec![
            ModelRoute::new("gpt-4o", "openai/gpt-4o"),
            ModelRoute::new("gpt-4o-mini", "openai/gpt-4o-mini"),
            ModelRoute::new("claude-3.5-sonnet", "anthropic/claude-3.5-sonnet"),
            ModelRoute::new("gemini-2.0-flash", "google/gemini-2.0-flash-001"),
            ModelRoute::new("llama-3.3-70b", "meta-llama/llama-3.3-70b-instruct"),
            ModelRoute::new("deepseek-chat", "deepseek/deepseek-chat"),
            ModelRoute::new("deepseek-r1", "deepseek/deepseek-r1:free"),
        ];

        let fallback_models = HashMap::from([(
            "deepseek/deepseek-r1:free".to_string(),
            "deepseek/deepseek-chat-v3-0324:free".to_string(),
        )]);

        Self {
            models,
            default_model: "deepseek/deepseek-r1:free".to_string(),
            fallback_models,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: 10,
            query_limit: RateLimitPreset::AiQuery.config(),
            upstream_limit: RateLimitPreset::OpenRouter.config(),
            status_limit: RateLimitPreset::Stats.config(),
            general_limit: RateLimitPreset::General.config(),
            probe_batch_size: 3,
            probe_batch_pause: Duration::from_secs(1),
            availability_ttl: Duration::from_secs(5 * 60),
            body_limit: 12 * 1024 * 1024,
        }
    }
}

impl ChatConfig {
    /// Override the history window (`CHAT_HISTORY_LIMIT`)
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Logical model names callers may request
    pub fn allowed_models(&self) -> Vec<&str> {
        self.models.iter().map(|route| route.name.as_str()).collect()
    }

    /// Map a logical name to its upstream id; unknown or absent names get
    /// the default model
    pub fn resolve_model(&self, name: Option<&str>) -> &str {
        name.and_then(|name| self.models.iter().find(|route| route.name == name))
            .map(|route| route.upstream_id.as_str())
            .unwrap_or(&self.default_model)
    }

    /// Effective bucket for a preset, honoring the overrides above
    pub fn bucket(&self, preset: RateLimitPreset) -> RateLimitConfig {
        match preset {
            RateLimitPreset::AiQuery => self.query_limit.clone(),
            RateLimitPreset::OpenRouter => self.upstream_limit.clone(),
            RateLimitPreset::Stats => self.status_limit.clone(),
            RateLimitPreset::General => self.general_limit.clone(),
            RateLimitPreset::Tracking => preset.config(),
        }
    }

    /// Backup for an upstream id, if one is configured
    pub fn fallback_for(&self, upstream_id: &str) -> Option<&str> {
        self.fallback_models.get(upstream_id).map(String::as_str)
    }
}
