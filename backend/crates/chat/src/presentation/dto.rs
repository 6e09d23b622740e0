//! API DTOs (Data Transfer Objects)
//!
//! Chat request bodies are validated from raw JSON (see
//! `application::validate_query`), so only responses and query strings
//! have types here.

use chrono::{DateTime, Utc};
use kernel::id::RequestId;
use serde::{Deserialize, Serialize};

use crate::application::{AvailabilitySnapshot, ChatCompletion, RateLimitStatus};
use crate::error::RateLimitRejection;

/// Response for POST /api/chat
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub request_id: RequestId,
}

impl From<ChatCompletion> for ChatResponse {
    fn from(completion: ChatCompletion) -> Self {
        Self {
            response: completion.response,
            model: completion.model,
            request_id: completion.request_id,
        }
    }
}

/// Single SSE frame sent with a 429 on POST /api/chat/stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedChunk {
    pub content: String,
    pub done: bool,
    pub used: u32,
    pub limit: u32,
    pub reset_in_seconds: u64,
}

impl From<&RateLimitRejection> for RateLimitedChunk {
    fn from(rejection: &RateLimitRejection) -> Self {
        Self {
            content: rejection.message.clone(),
            done: true,
            used: rejection.used(),
            limit: rejection.limit(),
            reset_in_seconds: rejection.reset_in_secs(),
        }
    }
}

/// Query for GET /api/rate-limit/status
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitStatusQuery {
    /// Preset name; defaults to `ai-query`
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Response for GET /api/rate-limit/status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub bucket: String,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Unix milliseconds
    pub reset_at: i64,
}

impl From<RateLimitStatus> for RateLimitStatusResponse {
    fn from(status: RateLimitStatus) -> Self {
        Self {
            bucket: status.bucket.to_string(),
            count: status.count,
            limit: status.limit,
            remaining: status.remaining,
            reset_at: status.reset_at_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDto {
    pub name: String,
    pub upstream_id: String,
    pub available: bool,
}

/// Response for GET /api/models
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelDto>,
    pub checked_at: DateTime<Utc>,
}

impl From<&AvailabilitySnapshot> for ModelsResponse {
    fn from(snapshot: &AvailabilitySnapshot) -> Self {
        Self {
            models: snapshot
                .models
                .iter()
                .map(|model| ModelDto {
                    name: model.name.clone(),
                    upstream_id: model.upstream_id.clone(),
                    available: model.available,
                })
                .collect(),
            checked_at: snapshot.checked_at,
        }
    }
}
