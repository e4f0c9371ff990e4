//! Configuration errors for resilience components.

use thiserror::Error;

/// Errors raised while constructing a circuit breaker or rate limiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// A configuration value is out of range
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// The offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl ResilienceError {
    /// Create an invalid config error for the given field.
    #[must_use]
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
