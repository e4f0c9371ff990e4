//! Bearer token value and its compact wire encoding.
//!
//! Wire format: `base64url(payload) "." base64url(signature)` without padding,
//! where payload is `{"sub":…,"iat":…,"exp":…}` with millisecond Unix
//! timestamps. The signature covers the canonical payload re-encoded from
//! the claimed fields, so any edit to a field or to the signature is detected.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TokenError;

/// Canonical claim set. Field order here is the signed byte order.
#[derive(Debug, Serialize)]
struct CanonicalClaims<'a> {
    sub: &'a str,
    iat: i64,
    exp: i64,
}

/// Claims as read off the wire; every field is optional so absence can be reported.
#[derive(Debug, Deserialize)]
struct WireClaims {
    sub: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
}

/// Signed bearer token.
///
/// Immutable once issued. Obtain one from
/// [`TokenService::issue`](super::TokenService::issue) or [`Token::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    subject: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    signature: Vec<u8>,
}

impl Token {
    /// Assembles a token from already-known parts. Nothing is checked here;
    /// [`TokenService::verify`](super::TokenService::verify) does that.
    #[must_use]
    pub fn from_parts(
        subject: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            subject,
            issued_at,
            expires_at,
            signature,
        }
    }

    /// The authenticated principal
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issue time
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry time; the token is valid up to and including this instant
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Raw signature bytes
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Canonical bytes the signature is computed over.
    pub(crate) fn signing_input(&self) -> Result<Vec<u8>, TokenError> {
        canonical_payload(
            &self.subject,
            self.issued_at.timestamp_millis(),
            self.expires_at.timestamp_millis(),
        )
    }

    /// Encodes the token into its opaque string form.
    pub fn encode(&self) -> Result<String, TokenError> {
        let payload = self.signing_input()?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(&self.signature)
        ))
    }

    /// Parses the opaque string form. The signature is not checked here.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let (payload, signature) = raw
            .trim()
            .split_once('.')
            .ok_or_else(|| TokenError::malformed("expected two segments"))?;

        if signature.contains('.') {
            return Err(TokenError::malformed("expected two segments"));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::malformed("payload is not base64url"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::malformed("signature is not base64url"))?;

        if signature.is_empty() {
            return Err(TokenError::malformed("missing signature"));
        }

        let claims: WireClaims = serde_json::from_slice(&payload)
            .map_err(|e| TokenError::malformed(format!("payload is not valid JSON: {e}")))?;

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TokenError::malformed("missing claim: sub"))?;
        let iat = claims
            .iat
            .ok_or_else(|| TokenError::malformed("missing claim: iat"))?;
        let exp = claims
            .exp
            .ok_or_else(|| TokenError::malformed("missing claim: exp"))?;

        if exp <= iat {
            return Err(TokenError::malformed("exp must be after iat"));
        }

        let issued_at = from_millis(iat, "iat")?;
        let expires_at = from_millis(exp, "exp")?;

        Ok(Self::from_parts(subject, issued_at, expires_at, signature))
    }
}

pub(crate) fn canonical_payload(subject: &str, iat: i64, exp: i64) -> Result<Vec<u8>, TokenError> {
    Ok(serde_json::to_vec(&CanonicalClaims { sub: subject, iat, exp })?)
}

pub(crate) fn from_millis(millis: i64, claim: &str) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| TokenError::malformed(format!("claim {claim} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_payload(json: &str) -> String {
        format!("{}.{}", URL_SAFE_NO_PAD.encode(json), URL_SAFE_NO_PAD.encode(b"sig"))
    }

    #[test]
    fn test_canonical_payload_field_order() {
        let payload = canonical_payload("alice", 1_000, 2_000).unwrap();
        assert_eq!(payload, br#"{"sub":"alice","iat":1000,"exp":2000}"#);
    }

    #[test]
    fn test_decode_rejects_missing_segments() {
        assert!(matches!(Token::decode("abc"), Err(TokenError::Malformed { .. })));
        assert!(matches!(Token::decode("a.b.c"), Err(TokenError::Malformed { .. })));
        assert!(matches!(Token::decode(""), Err(TokenError::Malformed { .. })));
    }

    #[test]
    fn test_decode_rejects_missing_claims() {
        for json in [
            r#"{"iat":1000,"exp":2000}"#,
            r#"{"sub":"alice","exp":2000}"#,
            r#"{"sub":"alice","iat":1000}"#,
            r#"{"sub":"","iat":1000,"exp":2000}"#,
            r#"{"sub":"alice","iat":2000,"exp":2000}"#,
        ] {
            let err = Token::decode(&encoded_payload(json)).unwrap_err();
            assert!(matches!(err, TokenError::Malformed { .. }), "{json}: {err:?}");
        }
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        let raw = encoded_payload("not json");
        assert!(matches!(Token::decode(&raw), Err(TokenError::Malformed { .. })));
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let iat = from_millis(1_700_000_000_123, "iat").unwrap();
        let exp = from_millis(1_700_000_900_123, "exp").unwrap();
        let token = Token::from_parts("alice".to_string(), iat, exp, vec![1, 2, 3]);

        let decoded = Token::decode(&token.encode().unwrap()).unwrap();

        assert_eq!(decoded, token);
    }
}
