//! Password hashing with Argon2id.

use std::fmt;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// Password hashing errors
#[derive(Error, Debug)]
pub enum HashError {
    /// Hashing itself failed
    #[error("Password hashing failed: {0}")]
    Hash(String),

    /// A stored hash could not be parsed
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Hasher parameters rejected
    #[error("Invalid hasher parameters: {0}")]
    InvalidParams(String),
}

/// One-way password hashing.
pub trait PasswordHasher: Send + Sync + fmt::Debug {
    /// Hashes a password with a fresh random salt.
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// Checks `password` against a stored hash. A mismatch is `Ok(false)`.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError>;
}

/// Argon2id hasher producing PHC strings (`$argon2id$...`).
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Hasher with the library's recommended cost parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hasher with explicit memory (KiB), iteration and parallelism costs.
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hash).map_err(|e| HashError::InvalidHash(e.to_string()))?;
        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::with_params(8, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_is_phc_argon2id() {
        let hash = hasher().hash("pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify_matches_only_original_password() {
        let hasher = hasher();
        let hash = hasher.hash("pw").unwrap();

        assert!(hasher.verify("pw", &hash).unwrap());
        assert!(!hasher.verify("pw2", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = hasher();
        assert_ne!(hasher.hash("pw").unwrap(), hasher.hash("pw").unwrap());
    }

    #[test]
    fn test_invalid_stored_hash() {
        assert!(matches!(
            hasher().verify("pw", "not-a-hash"),
            Err(HashError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_params() {
        assert!(matches!(
            Argon2Hasher::with_params(0, 0, 0),
            Err(HashError::InvalidParams(_))
        ));
    }
}
