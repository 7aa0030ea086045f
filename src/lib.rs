//! Windowgate - Fixed-Window Rate Limiting
//!
//! This crate implements fixed-window request rate limiting with per-key
//! counters, periodic eviction of expired windows and named policies for
//! classes of endpoints. An axum middleware puts a limiter in front of a
//! route group, and a label-keyed variant throttles outbound calls.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
