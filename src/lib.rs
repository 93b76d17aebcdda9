//! Ratekeeper - In-Memory Rate Limiting Engine
//!
//! This crate decides, per subject key and per named policy, whether an
//! operation may proceed right now. Policies are fixed-window counters:
//! each key gets `max_tokens` per window, and the allowance resets in one
//! step when the window elapses. A background sweeper reclaims buckets
//! whose window has passed so memory stays bounded by active subjects.

pub mod config;
pub mod error;
pub mod ratelimit;
