//! Log output for the resilience components and the services built on them.
//!
//! Breaker transitions, rate-limit denials and token failures are emitted as
//! `tracing` events; this module installs the subscriber that renders them.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the configured directive parses.
const FALLBACK_FILTER: &str = "info";

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event, with targets
    Json,
}

/// Subscriber settings for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Recorded on the startup event
    pub service_name: String,
    /// `EnvFilter` directive, e.g. `info` or `auth_resilience=debug`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl TracingConfig {
    /// Settings for `service_name` at the `info` level.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            filter: FALLBACK_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }

    /// Replaces the filter directive.
    #[must_use]
    pub fn with_filter(mut self, directive: impl Into<String>) -> Self {
        self.filter = directive.into();
        self
    }

    /// Selects the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// `RUST_LOG` wins when set and valid, then the configured directive.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
    }
}

/// Installs the global subscriber described by `config`.
///
/// Returns `false` when a subscriber is already installed; the existing one
/// is left in place.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            filter = %config.filter,
            format = ?config.format,
            "Tracing initialized"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_info_pretty() {
        let config = TracingConfig::new("auth-gateway");

        assert_eq!(config.service_name, "auth-gateway");
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_builders() {
        let config = TracingConfig::new("auth-gateway")
            .with_filter("auth_resilience=debug")
            .with_format(LogFormat::Json);

        assert_eq!(config.filter, "auth_resilience=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let config = TracingConfig::new("auth-gateway").with_filter("warn");
        init_tracing(&config);
        assert!(!init_tracing(&config.with_format(LogFormat::Json)));
    }
}
