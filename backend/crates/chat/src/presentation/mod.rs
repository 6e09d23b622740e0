//! Presentation Layer
//!
//! HTTP handlers, DTOs, router, and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use handlers::ChatAppState;
pub use middleware::{ClientIdentity, RateLimitMiddlewareState, enforce_rate_limit};
pub use router::{chat_router, chat_router_generic};
