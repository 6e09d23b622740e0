//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Fixed-window rate limiting (store trait, in-memory store, HTTP helpers)
//! - Client identity resolution from request headers

pub mod client;
pub mod rate_limit;
