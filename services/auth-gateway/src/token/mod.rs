//! Bearer token issuance and verification

mod claims;
mod service;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use claims::Token;
pub use service::{DEFAULT_TOKEN_TTL, TokenService};

/// Errors raised by [`TokenService`] and the token wire codec.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Subject, TTL or secret rejected at issue/construction time
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// What was wrong
        reason: String,
    },

    /// Signature does not match the claimed fields
    #[error("Token signature invalid")]
    SignatureInvalid,

    /// Token is past its expiry
    #[error("Token expired at {expired_at}")]
    Expired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// Token structure is malformed or a required field is absent
    #[error("Token malformed: {reason}")]
    Malformed {
        /// Description of the malformation
        reason: String,
    },

    /// Claims could not be serialized
    #[error("Token encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl TokenError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
