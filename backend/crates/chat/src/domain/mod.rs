//! Domain Layer - Chat vocabulary and policies
//!
//! This layer contains:
//! - Value objects (messages, validated query, stream chunks, request stages)
//! - Content moderation
//! - The upstream provider trait (interface)

pub mod moderation;
pub mod upstream;
pub mod value_objects;
