//! Gateway error types
//!
//! This module provides the outward error surface of the gateway:
//! - A non-exhaustive enum covering every failure a caller can see
//! - Stable error codes with their HTTP status
//! - Client-safe error responses carrying a correlation ID
//! - Conversion from the token, store and hashing errors

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{HashError, StoreError};
use crate::token::TokenError;

/// Sensitive patterns that must never reach a client-facing message
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "bearer",
    "authorization",
    "hash",
    "salt",
    "private",
];

/// Errors returned by [`AuthGateway`](crate::AuthGateway) operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request fields were empty or otherwise unusable
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// What was wrong
        reason: String,
    },

    /// Registration for a name that already exists
    #[error("Username already taken: {username}")]
    UsernameTaken {
        /// The contested name
        username: String,
    },

    /// Unknown user or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Login attempts exceeded for this client
    #[error("Rate limit exceeded")]
    RateLimited {
        /// When the client can retry
        retry_after: Duration,
    },

    /// Token signature verification failed
    #[error("Token signature invalid")]
    SignatureInvalid,

    /// Token has expired
    #[error("Token expired at {expired_at}")]
    Expired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// Token structure is malformed
    #[error("Token malformed: {reason}")]
    MalformedToken {
        /// Description of the malformation
        reason: String,
    },

    /// The protected dependency is unavailable, whether because its circuit
    /// is open or because the call itself failed
    #[error("Service unavailable: {service}")]
    ServiceUnavailable {
        /// Name of the unavailable service
        service: String,
        /// Suggested retry duration, known when the circuit is open
        retry_after: Option<Duration>,
    },

    /// Internal error (details sanitized in responses)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    UsernameTaken,
    InvalidCredentials,
    RateLimited,
    TokenInvalid,
    TokenExpired,
    TokenMalformed,
    ServiceUnavailable,
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::RateLimited => "RATE_LIMITED",
            Self::TokenInvalid => "AUTH_TOKEN_INVALID",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenMalformed => "AUTH_TOKEN_MALFORMED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput | Self::UsernameTaken => 400,
            Self::InvalidCredentials
            | Self::TokenInvalid
            | Self::TokenExpired
            | Self::TokenMalformed => 401,
            Self::RateLimited => 429,
            Self::ServiceUnavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Structured error response with correlation ID
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable message (sanitized)
    pub message: String,
    /// Correlation ID for tracing
    pub correlation_id: Uuid,
    /// Seconds until a retry may succeed, rounded up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorResponse {
    /// Create a new error response from a [`GatewayError`]
    #[must_use]
    pub fn from_error(error: &GatewayError, correlation_id: Uuid) -> Self {
        let message = match error {
            GatewayError::InvalidInput { reason } => sanitize_message(reason, "Invalid request"),
            GatewayError::UsernameTaken { .. } => "Username already taken".to_string(),
            GatewayError::InvalidCredentials => "Incorrect username or password".to_string(),
            GatewayError::RateLimited { .. } => "Rate limit exceeded".to_string(),
            GatewayError::SignatureInvalid => "Token signature is invalid".to_string(),
            GatewayError::Expired { .. } => "Token has expired".to_string(),
            GatewayError::MalformedToken { reason } => {
                sanitize_message(reason, "Invalid token format")
            }
            GatewayError::ServiceUnavailable { service, .. } => {
                format!("Service {service} temporarily unavailable")
            }
            // Never expose internal error details
            GatewayError::Internal(_) => "Internal error".to_string(),
        };

        Self {
            code: error.code(),
            message,
            correlation_id,
            retry_after_secs: error.retry_after().map(ceil_secs),
        }
    }

    /// HTTP status for this response
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl GatewayError {
    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } => ErrorCode::InvalidInput,
            Self::UsernameTaken { .. } => ErrorCode::UsernameTaken,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::SignatureInvalid => ErrorCode::TokenInvalid,
            Self::Expired { .. } => ErrorCode::TokenExpired,
            Self::MalformedToken { .. } => ErrorCode::TokenMalformed,
            Self::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code().http_status()
    }

    /// Value for the `WWW-Authenticate` header on 401 responses
    #[must_use]
    pub const fn www_authenticate(&self) -> Option<&'static str> {
        if self.http_status() == 401 {
            Some("Bearer")
        } else {
            None
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServiceUnavailable { .. }
        )
    }

    /// Get retry-after duration if applicable
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Replaces a message mentioning anything sensitive with `fallback`
fn sanitize_message(message: &str, fallback: &str) -> String {
    let lower = message.to_lowercase();
    if SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p)) {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

// ============================================================================
// From trait implementations for automatic error conversion
// ============================================================================

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidInput { reason } => Self::InvalidInput { reason },
            TokenError::SignatureInvalid => Self::SignatureInvalid,
            TokenError::Expired { expired_at } => Self::Expired { expired_at },
            TokenError::Malformed { reason } => Self::MalformedToken { reason },
            TokenError::Encoding(e) => Self::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken(username) => Self::UsernameTaken { username },
            StoreError::Backend(_) => Self::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<HashError> for GatewayError {
    fn from(err: HashError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::invalid_input("x").http_status(), 400);
        assert_eq!(
            GatewayError::UsernameTaken {
                username: "alice".into()
            }
            .http_status(),
            400
        );
        assert_eq!(GatewayError::InvalidCredentials.http_status(), 401);
        assert_eq!(GatewayError::SignatureInvalid.http_status(), 401);
        assert_eq!(
            GatewayError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .http_status(),
            429
        );
        assert_eq!(
            GatewayError::ServiceUnavailable {
                service: "external".into(),
                retry_after: None
            }
            .http_status(),
            503
        );
        assert_eq!(
            GatewayError::Internal(anyhow::anyhow!("boom")).http_status(),
            500
        );
    }

    #[test]
    fn test_www_authenticate_only_on_401() {
        assert_eq!(GatewayError::InvalidCredentials.www_authenticate(), Some("Bearer"));
        assert_eq!(GatewayError::invalid_input("x").www_authenticate(), None);
    }

    #[test]
    fn test_retryable() {
        assert!(GatewayError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!GatewayError::InvalidCredentials.is_retryable());
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = GatewayError::Internal(anyhow::anyhow!("db password=hunter2 leaked"));
        let response = ErrorResponse::from_error(&err, Uuid::new_v4());

        assert_eq!(response.message, "Internal error");
        assert_eq!(response.code, ErrorCode::Internal);
    }

    #[test]
    fn test_malformed_reason_sanitized() {
        let err = GatewayError::MalformedToken {
            reason: "bad secret key material".into(),
        };
        let response = ErrorResponse::from_error(&err, Uuid::nil());
        assert_eq!(response.message, "Invalid token format");

        let err = GatewayError::MalformedToken {
            reason: "expected two segments".into(),
        };
        let response = ErrorResponse::from_error(&err, Uuid::nil());
        assert_eq!(response.message, "expected two segments");
    }

    #[test]
    fn test_response_serializes_code_and_retry_after() {
        let err = GatewayError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        let response = ErrorResponse::from_error(&err, Uuid::nil());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["code"], "RATE_LIMITED");
        assert_eq!(json["retry_after_secs"], 2);
        assert_eq!(json["correlation_id"], Uuid::nil().to_string());
        assert_eq!(response.http_status(), 429);
    }

    #[test]
    fn test_token_errors_convert() {
        assert!(matches!(
            GatewayError::from(TokenError::SignatureInvalid),
            GatewayError::SignatureInvalid
        ));
        assert!(matches!(
            GatewayError::from(StoreError::UsernameTaken("alice".into())),
            GatewayError::UsernameTaken { .. }
        ));
        assert!(matches!(
            GatewayError::from(StoreError::Backend("down".into())),
            GatewayError::Internal(_)
        ));
    }
}
