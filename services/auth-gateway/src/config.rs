//! Gateway configuration
//!
//! Loaded from environment variables (and a `.env` file when present) with
//! validation. Parsing is written against a lookup function so it can be
//! exercised without touching the process environment.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use auth_resilience::{CircuitBreakerConfig, LogFormat, RateLimitConfig, TracingConfig};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },

    /// A value parsed but is out of range
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        /// Variable name
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Gateway configuration with validation.
pub struct GatewayConfig {
    /// HMAC signing secret for tokens
    pub token_secret: SecretString,
    /// Token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Login attempts allowed per client per window
    pub login_rate_limit: u32,
    /// Login rate window in seconds
    pub login_rate_window_secs: u64,
    /// Upper bound on tracked rate-limit clients
    pub rate_limit_max_clients: Option<usize>,
    /// Consecutive dependency failures before the circuit opens
    pub circuit_breaker_failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call
    pub circuit_breaker_reset_timeout_secs: u64,
    /// Upper bound on one dependency call, in seconds
    pub dependency_timeout_secs: u64,
    /// Log filter directive
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("login_rate_limit", &self.login_rate_limit)
            .field("login_rate_window_secs", &self.login_rate_window_secs)
            .field("rate_limit_max_clients", &self.rate_limit_max_clients)
            .field(
                "circuit_breaker_failure_threshold",
                &self.circuit_breaker_failure_threshold,
            )
            .field(
                "circuit_breaker_reset_timeout_secs",
                &self.circuit_breaker_reset_timeout_secs,
            )
            .field("dependency_timeout_secs", &self.dependency_timeout_secs)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl GatewayConfig {
    /// Config with the given secret and every other field at its default.
    #[must_use]
    pub fn new(token_secret: SecretString) -> Self {
        Self {
            token_secret,
            token_ttl_secs: 900,
            login_rate_limit: 3,
            login_rate_window_secs: 60,
            rate_limit_max_clients: None,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_reset_timeout_secs: 10,
            dependency_timeout_secs: 5,
            log_level: "info".to_string(),
            log_json: false,
        }
    }

    /// Loads configuration from environment variables with validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_secret = lookup("TOKEN_SECRET")
            .ok_or_else(|| ConfigError::MissingRequired("TOKEN_SECRET".to_string()))?;

        let config = Self {
            token_secret: SecretString::from(token_secret),
            token_ttl_secs: parse_var(&lookup, "TOKEN_TTL_SECS", 900)?,
            login_rate_limit: parse_var(&lookup, "LOGIN_RATE_LIMIT", 3)?,
            login_rate_window_secs: parse_var(&lookup, "LOGIN_RATE_WINDOW_SECS", 60)?,
            rate_limit_max_clients: parse_optional_var(&lookup, "RATE_LIMIT_MAX_CLIENTS")?,
            circuit_breaker_failure_threshold: parse_var(&lookup, "CB_FAILURE_THRESHOLD", 3)?,
            circuit_breaker_reset_timeout_secs: parse_var(&lookup, "CB_RESET_TIMEOUT_SECS", 10)?,
            dependency_timeout_secs: parse_var(&lookup, "DEPENDENCY_TIMEOUT_SECS", 5)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: parse_var(&lookup, "LOG_JSON", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired("TOKEN_SECRET".to_string()));
        }
        for (name, value) in [
            ("TOKEN_TTL_SECS", self.token_ttl_secs),
            ("LOGIN_RATE_WINDOW_SECS", self.login_rate_window_secs),
            ("CB_RESET_TIMEOUT_SECS", self.circuit_breaker_reset_timeout_secs),
            ("DEPENDENCY_TIMEOUT_SECS", self.dependency_timeout_secs),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be greater than 0"));
            }
        }
        if self.login_rate_limit == 0 {
            return Err(invalid("LOGIN_RATE_LIMIT", "must be greater than 0"));
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(invalid("CB_FAILURE_THRESHOLD", "must be greater than 0"));
        }
        if self.rate_limit_max_clients == Some(0) {
            return Err(invalid("RATE_LIMIT_MAX_CLIENTS", "must be greater than 0"));
        }
        Ok(())
    }

    /// Token lifetime
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Upper bound on one dependency call
    #[must_use]
    pub const fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    /// Rate limiter settings for the login endpoint.
    #[must_use]
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let config = RateLimitConfig::new(
            self.login_rate_limit,
            Duration::from_secs(self.login_rate_window_secs),
        );
        match self.rate_limit_max_clients {
            Some(max) => config.with_max_clients(max),
            None => config,
        }
    }

    /// Circuit breaker settings for the protected dependency.
    #[must_use]
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.circuit_breaker_failure_threshold)
            .with_reset_timeout(Duration::from_secs(self.circuit_breaker_reset_timeout_secs))
    }

    /// Tracing subscriber settings.
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        let format = if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        };
        TracingConfig::new(env!("CARGO_PKG_NAME"))
            .with_filter(self.log_level.clone())
            .with_format(format)
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a variable with a default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_optional_var(lookup, name)?.unwrap_or(default))
}

/// Parse a variable that may be absent.
fn parse_optional_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(name)
        .map(|val| {
            val.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
