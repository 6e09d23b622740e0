//! Shared Kernel - Cross-crate minimal core
//!
//! This crate contains the vocabulary every other crate agrees on:
//! - The unified HTTP-facing error type and its classification
//! - Request correlation identifiers
//!
//! **Design Principle**: Only include things whose meaning is identical
//! for the rate limiter, the chat pipeline and the API binary.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
