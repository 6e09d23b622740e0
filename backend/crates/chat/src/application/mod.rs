//! Application Layer
//!
//! Use cases and application services.

pub mod config;
pub mod model_availability;
pub mod rate_limit_status;
pub mod stream_chat;
pub mod validate_query;

// Re-exports
pub use config::{ChatConfig, ModelRoute};
pub use model_availability::{AvailabilitySnapshot, ModelAvailability, ModelAvailabilityService};
pub use rate_limit_status::{RateLimitStatus, RateLimitStatusUseCase};
pub use stream_chat::{ChatCompletion, ChatStream, ChunkStream, StreamChatUseCase};
pub use validate_query::{sanitize_text, validate};
