//! Turnpike - Request-Admission Rate Limiting Middleware
//!
//! This crate implements a per-identity request-admission guard for axum
//! services. Each inbound request is counted against a rolling one-second
//! budget keyed by client IP or API token; identities that exceed their
//! budget are locked out for a configurable duration. Counting and block
//! state live behind a storage adapter trait with in-memory and redis
//! implementations.

pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod response;
pub mod storage;
