//! Chat Backend Module
//!
//! Clean Architecture structure:
//! - `domain/` - Chat vocabulary, moderation, upstream provider trait
//! - `application/` - Use cases (validation, streaming, status, availability)
//! - `infra/` - OpenRouter client and SSE decoding
//! - `presentation/` - HTTP handlers, DTOs, router
//!
//! ## Request Governance
//! - Payloads are validated against an explicit key and model allow-list
//! - Per-minute query and per-day upstream budgets per caller identity
//! - Pattern moderation on the query and on the streamed answer
//! - Upstream trouble never surfaces as a 5xx: callers get a systems notice

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::ChatConfig;
pub use error::{ChatError, ChatResult};
pub use infra::openrouter::{OpenRouterClient, OpenRouterConfig};
pub use presentation::router::chat_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

pub mod config {
    pub use crate::application::config::*;
}

pub mod models {
    pub use crate::domain::value_objects::*;
    pub use crate::presentation::dto::*;
}

pub mod handlers {
    pub use crate::presentation::handlers::*;
}

pub mod router {
    pub use crate::presentation::router::*;
}

pub mod middleware {
    pub use crate::presentation::middleware::*;
}
