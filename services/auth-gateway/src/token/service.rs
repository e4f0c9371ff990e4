//! HMAC-SHA256 token signing with an injected clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use auth_resilience::Clock;
use chrono::{DateTime, Utc};
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::claims::{Token, canonical_payload, from_millis};
use super::TokenError;

/// TTL used by [`TokenService::issue_default`] unless configured otherwise.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Issues and verifies signed bearer tokens.
pub struct TokenService {
    key: hmac::Key,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("clock", &self.clock)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates a token service signing with `secret`.
    pub fn new(secret: &SecretString, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        let secret = secret.expose_secret();
        if secret.is_empty() {
            return Err(TokenError::invalid_input("signing secret must not be empty"));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            clock,
            default_ttl: DEFAULT_TOKEN_TTL,
        })
    }

    /// Overrides the TTL used by [`issue_default`](Self::issue_default).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Result<Self, TokenError> {
        if ttl.is_zero() {
            return Err(TokenError::invalid_input("ttl must be greater than 0"));
        }
        self.default_ttl = ttl;
        Ok(self)
    }

    /// The TTL used by [`issue_default`](Self::issue_default).
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issues a token for `subject` valid for `ttl` from now.
    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<Token, TokenError> {
        if subject.is_empty() {
            return Err(TokenError::invalid_input("subject must not be empty"));
        }
        if ttl.is_zero() {
            return Err(TokenError::invalid_input("ttl must be greater than 0"));
        }

        // Round sub-millisecond TTLs up so expiry stays strictly after issue.
        let ttl_ms = i64::try_from(ttl.as_nanos().div_ceil(1_000_000))
            .map_err(|_| TokenError::invalid_input("ttl out of range"))?;
        let iat = self.clock.now().timestamp_millis();
        let exp = iat
            .checked_add(ttl_ms)
            .ok_or_else(|| TokenError::invalid_input("ttl out of range"))?;

        let issued_at = from_millis(iat, "iat")?;
        let expires_at = from_millis(exp, "exp")
            .map_err(|_| TokenError::invalid_input("ttl out of range"))?;

        let payload = canonical_payload(subject, iat, exp)?;
        let signature = hmac::sign(&self.key, &payload).as_ref().to_vec();

        debug!(subject = %subject, expires_at = %expires_at, "Token issued");
        Ok(Token::from_parts(subject.to_string(), issued_at, expires_at, signature))
    }

    /// Issues a token with the default TTL.
    pub fn issue_default(&self, subject: &str) -> Result<Token, TokenError> {
        self.issue(subject, self.default_ttl)
    }

    /// Verifies a token and returns its subject.
    ///
    /// The signature is checked before expiry, so a tampered token reports
    /// `SignatureInvalid` whether or not it has also expired.
    pub fn verify(&self, token: &Token) -> Result<String, TokenError> {
        if token.subject().is_empty() {
            return Err(TokenError::malformed("missing claim: sub"));
        }
        if token.signature().is_empty() {
            return Err(TokenError::malformed("missing signature"));
        }
        if token.expires_at() <= token.issued_at() {
            return Err(TokenError::malformed("exp must be after iat"));
        }
        // The signature only covers whole milliseconds.
        if !whole_millis(token.issued_at()) || !whole_millis(token.expires_at()) {
            return Err(TokenError::malformed("timestamps must be whole milliseconds"));
        }

        let payload = token.signing_input()?;
        hmac::verify(&self.key, &payload, token.signature())
            .map_err(|_| TokenError::SignatureInvalid)?;

        if self.clock.now() > token.expires_at() {
            return Err(TokenError::Expired {
                expired_at: token.expires_at(),
            });
        }

        Ok(token.subject().to_string())
    }

    /// Decodes the wire form and verifies it.
    pub fn verify_encoded(&self, raw: &str) -> Result<String, TokenError> {
        self.verify(&Token::decode(raw)?)
    }
}

fn whole_millis(at: DateTime<Utc>) -> bool {
    at.timestamp_subsec_nanos() % 1_000_000 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_resilience::ManualClock;

    fn service(clock: &ManualClock) -> TokenService {
        TokenService::new(
            &SecretString::from("test-secret-key".to_string()),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_sets_times_from_clock() {
        let clock = ManualClock::new();
        let tokens = service(&clock);

        let token = tokens.issue("alice", Duration::from_secs(60)).unwrap();

        assert_eq!(token.subject(), "alice");
        assert_eq!(token.issued_at().timestamp_millis(), clock.now().timestamp_millis());
        assert_eq!(
            token.expires_at() - token.issued_at(),
            chrono::TimeDelta::seconds(60)
        );
    }

    #[test]
    fn test_issue_rejects_empty_subject_and_zero_ttl() {
        let tokens = service(&ManualClock::new());

        assert!(matches!(
            tokens.issue("", Duration::from_secs(1)),
            Err(TokenError::InvalidInput { .. })
        ));
        assert!(matches!(
            tokens.issue("alice", Duration::ZERO),
            Err(TokenError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_sub_millisecond_ttl_still_expires_after_issue() {
        let tokens = service(&ManualClock::new());
        let token = tokens.issue("alice", Duration::from_micros(10)).unwrap();
        assert!(token.expires_at() > token.issued_at());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let clock = ManualClock::new();
        let tokens = service(&clock);

        let a = tokens.issue("alice", Duration::from_secs(5)).unwrap();
        let b = tokens.issue("alice", Duration::from_secs(5)).unwrap();

        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_valid_at_expiry_instant() {
        let clock = ManualClock::new();
        let tokens = service(&clock);
        let token = tokens.issue("alice", Duration::from_secs(1)).unwrap();

        clock.set(token.expires_at());
        assert_eq!(tokens.verify(&token).unwrap(), "alice");

        clock.advance(Duration::from_millis(1));
        assert!(matches!(tokens.verify(&token), Err(TokenError::Expired { .. })));
    }

    #[test]
    fn test_sub_millisecond_expiry_extension_rejected() {
        let clock = ManualClock::new();
        let tokens = service(&clock);
        let token = tokens.issue("alice", Duration::from_secs(1)).unwrap();
        let stretched = Token::from_parts(
            token.subject().to_string(),
            token.issued_at(),
            token.expires_at() + chrono::TimeDelta::microseconds(900),
            token.signature().to_vec(),
        );

        clock.set(token.expires_at() + chrono::TimeDelta::microseconds(500));

        assert!(matches!(tokens.verify(&token), Err(TokenError::Expired { .. })));
        assert!(matches!(tokens.verify(&stretched), Err(TokenError::Malformed { .. })));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = TokenService::new(
            &SecretString::from(String::new()),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(TokenError::InvalidInput { .. })));
    }

    #[test]
    fn test_default_ttl() {
        let clock = ManualClock::new();
        let tokens = service(&clock)
            .with_default_ttl(Duration::from_secs(30))
            .unwrap();

        let token = tokens.issue_default("alice").unwrap();

        assert_eq!(tokens.default_ttl(), Duration::from_secs(30));
        assert_eq!(
            token.expires_at() - token.issued_at(),
            chrono::TimeDelta::seconds(30)
        );
        assert!(service(&clock).with_default_ttl(Duration::ZERO).is_err());
    }

    #[test]
    fn test_one_second_token_expires_between_ticks() {
        let clock = ManualClock::new();
        let tokens = service(&clock);
        let token = tokens.issue("alice", Duration::from_secs(1)).unwrap();

        clock.advance(Duration::from_millis(900));
        assert_eq!(tokens.verify(&token).unwrap(), "alice");

        clock.advance(Duration::from_millis(200));
        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, TokenError::Expired { expired_at } if expired_at == token.expires_at()));
    }

    #[test]
    fn test_tampered_signature_reported_before_expiry() {
        let clock = ManualClock::new();
        let tokens = service(&clock);
        let token = tokens.issue("alice", Duration::from_secs(1)).unwrap();

        let mut signature = token.signature().to_vec();
        signature[0] ^= 0x01;
        let tampered = Token::from_parts(
            token.subject().to_string(),
            token.issued_at(),
            token.expires_at(),
            signature,
        );

        assert!(matches!(tokens.verify(&tampered), Err(TokenError::SignatureInvalid)));
        clock.advance(Duration::from_secs(5));
        assert!(matches!(tokens.verify(&tampered), Err(TokenError::SignatureInvalid)));
    }

    #[test]
    fn test_other_secret_rejected() {
        let clock = ManualClock::new();
        let other = TokenService::new(
            &SecretString::from("another-secret".to_string()),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let token = other.issue("alice", Duration::from_secs(60)).unwrap();

        assert!(matches!(
            service(&clock).verify(&token),
            Err(TokenError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_encoded() {
        let clock = ManualClock::new();
        let tokens = service(&clock);
        let raw = tokens
            .issue("alice", Duration::from_secs(60))
            .unwrap()
            .encode()
            .unwrap();

        assert_eq!(tokens.verify_encoded(&raw).unwrap(), "alice");
        assert!(matches!(
            tokens.verify_encoded("garbage"),
            Err(TokenError::Malformed { .. })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let tokens = service(&ManualClock::new());
        assert!(!format!("{tokens:?}").contains("test-secret-key"));
    }
}
