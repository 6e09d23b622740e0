//! Rate Limiting Infrastructure
//!
//! Fixed-window request counters keyed by (bucket, identity).
//!
//! A bucket is a named [`RateLimitConfig`]; every bucket owns its own
//! counter map. A window resets wholesale at `reset_at`, so a client can
//! land up to `2 × max_requests` requests around a window boundary. That is
//! accepted: the limiter exists for upstream cost control, not security.
//!
//! Storage sits behind the [`RateLimitStore`] trait; the process-local
//! implementation is [`memory::InMemoryRateLimiter`].

pub mod clock;
pub mod memory;
pub mod response;

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::client::Identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::InMemoryRateLimiter;
pub use response::{apply_rate_limit, rate_limit_headers, too_many_requests};

/// Rate limit configuration (one bucket)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Bucket name, part of the storage key
    pub name: Cow<'static, str>,
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
    /// Message shown to callers that hit the limit
    pub message: Cow<'static, str>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitPreset::General.config()
    }
}

impl RateLimitConfig {
    pub fn new(name: impl Into<Cow<'static, str>>, max_requests: u32, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window: Duration::from_secs(window_secs),
            message: Cow::Borrowed("Too many requests, please try again later."),
        }
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

/// Named bucket presets used by the HTTP endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPreset {
    /// Chat queries: 10 per minute
    AiQuery,
    /// Miscellaneous API calls: 30 per minute
    General,
    /// Visitor tracking beacons: 60 per minute
    Tracking,
    /// Stats / status reads: 100 per minute
    Stats,
    /// Upstream provider calls: 45 per day
    OpenRouter,
}

impl RateLimitPreset {
    pub const ALL: [RateLimitPreset; 5] = [
        RateLimitPreset::AiQuery,
        RateLimitPreset::General,
        RateLimitPreset::Tracking,
        RateLimitPreset::Stats,
        RateLimitPreset::OpenRouter,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            RateLimitPreset::AiQuery => "ai-query",
            RateLimitPreset::General => "general",
            RateLimitPreset::Tracking => "tracking",
            RateLimitPreset::Stats => "stats",
            RateLimitPreset::OpenRouter => "openrouter",
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        let (max_requests, window_secs, message) = match self {
            RateLimitPreset::AiQuery => (
                10,
                60,
                "Too many AI queries. Please wait a minute before asking again.",
            ),
            RateLimitPreset::General => (30, 60, "Too many requests, please try again later."),
            RateLimitPreset::Tracking => (60, 60, "Too many tracking requests."),
            RateLimitPreset::Stats => (100, 60, "Too many stats requests."),
            RateLimitPreset::OpenRouter => (
                45,
                24 * 60 * 60,
                "Daily AI request limit reached. Please come back tomorrow.",
            ),
        };
        RateLimitConfig::new(self.as_str(), max_requests, window_secs).with_message(message)
    }
}

impl fmt::Display for RateLimitPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a bucket name does not match any preset
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown rate limit bucket: {0}")]
pub struct UnknownPreset(pub String);

impl FromStr for RateLimitPreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RateLimitPreset::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPreset(s.to_string()))
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests counted in the current window
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: i64,
    /// Clock reading the result was computed at
    pub checked_at_ms: i64,
}

impl RateLimitResult {
    /// Whole seconds until the window resets (never below 1 while blocked)
    pub fn reset_in_secs(&self) -> u64 {
        let millis = (self.reset_at_ms - self.checked_at_ms).max(0) as u64;
        let secs = millis.div_ceil(1000);
        if self.allowed { secs } else { secs.max(1) }
    }

    /// Unix seconds of the reset instant, for `X-RateLimit-Reset`
    pub fn reset_at_secs(&self) -> i64 {
        self.reset_at_ms.div_euclid(1000)
    }
}

/// Rate limit storage failure
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit backend error: {0}")]
    Backend(String),
}

/// Trait for rate limit storage backends
///
/// `check` and `increment` are separate so callers can look before doing
/// expensive work; two concurrent callers may then both pass `check`.
/// Use `try_consume` where the slot must be reserved atomically.
#[trait_variant::make(RateLimitStore: Send)]
pub trait LocalRateLimitStore {
    /// Read the window for `identity`, opening it if none is live.
    /// Never changes the count.
    async fn check(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Count one request (starting a fresh window if the old one expired)
    async fn increment(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<(), RateLimitError>;

    /// Atomically check and count one request.
    /// `allowed == false` means nothing was counted.
    async fn try_consume(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Pure read: never creates or replaces an entry
    async fn status(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Drop every counter in every bucket
    async fn reset(&self) -> Result<(), RateLimitError>;
}
