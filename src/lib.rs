//! Paceline - Process-Local Rate Limiting
//!
//! This crate implements a sliding-window rate limiter for in-process use.
//! Callers invoke a blocking `trigger()` once per unit of work; when the
//! trigger budget for the trailing window is exhausted, the call sleeps
//! until enough old triggers have expired, then admits the work.

pub mod ratelimit;
pub mod config;
pub mod error;

pub use config::LimiterConfig;
pub use error::{PacelineError, Result};
pub use ratelimit::{AsyncRateLimiter, KeyedRateLimiter, RateLimiter};
