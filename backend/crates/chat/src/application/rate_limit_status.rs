//! Rate Limit Status Use Case
//!
//! Read-only view of a caller's window in one bucket.

use std::sync::Arc;

use platform::client::Identity;
use platform::rate_limit::{RateLimitPreset, RateLimitStore};

use crate::application::config::ChatConfig;
use crate::error::{ChatError, ChatResult};

/// Usage of one bucket by one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub bucket: RateLimitPreset,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Unix milliseconds at which the window resets
    pub reset_at_ms: i64,
}

/// Rate limit status use case
pub struct RateLimitStatusUseCase<L>
where
    L: RateLimitStore,
{
    limiter: Arc<L>,
    config: Arc<ChatConfig>,
}

impl<L> RateLimitStatusUseCase<L>
where
    L: RateLimitStore + Sync,
{
    pub fn new(limiter: Arc<L>, config: Arc<ChatConfig>) -> Self {
        Self { limiter, config }
    }

    /// Never opens a window or changes a count
    pub async fn execute(
        &self,
        bucket: RateLimitPreset,
        identity: &Identity,
    ) -> ChatResult<RateLimitStatus> {
        let config = self.config.bucket(bucket);
        let result = self
            .limiter
            .status(&config, identity)
            .await
            .map_err(|e| ChatError::Internal(e.to_string()))?;

        Ok(RateLimitStatus {
            bucket,
            count: result.count,
            limit: result.limit,
            remaining: result.remaining,
            reset_at_ms: result.reset_at_ms,
        })
    }
}
