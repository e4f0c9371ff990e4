//! Shared resilience primitives for auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - An injectable [`Clock`] so time-based state machines can be fast-forwarded in tests
//! - A circuit breaker with single-trial half-open admission
//! - A per-client fixed-window rate limiter
//! - Configuration errors shared by both
//! - Tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod rate_limiter;
pub mod tracing_config;

pub use circuit_breaker::{
    BreakerObserver, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ResilienceError;
pub use rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimitInfo, RateLimiter};
pub use tracing_config::{LogFormat, TracingConfig, init_tracing};
