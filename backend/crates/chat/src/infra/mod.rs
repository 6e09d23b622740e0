//! Infrastructure Layer
//!
//! Upstream provider client and its wire decoding.

pub mod openrouter;
pub mod sse;
