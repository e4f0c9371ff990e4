//! User credential storage.

mod password;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

pub use password::{Argon2Hasher, HashError, PasswordHasher};

/// A stored user record. Only the hash is kept, never the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Unique user name
    pub username: String,
    /// PHC-format password hash
    pub password_hash: String,
}

/// User store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another record already uses this name
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    /// Storage backend failure
    #[error("User store backend error: {0}")]
    Backend(String),
}

/// Persistence for user credentials.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Whether a user with this name exists.
    async fn exists(&self, username: &str) -> Result<bool, StoreError>;

    /// Fetches the credential for `username`, if any.
    async fn get(&self, username: &str) -> Result<Option<Credential>, StoreError>;

    /// Inserts a credential. Fails with [`StoreError::UsernameTaken`] if the
    /// name is already present, including when a concurrent insert won.
    async fn put(&self, username: &str, password_hash: String) -> Result<(), StoreError>;
}

/// Process-local user store.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, Credential>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether the store holds no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.users.read().contains_key(username))
    }

    async fn get(&self, username: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.users.read().get(username).cloned())
    }

    async fn put(&self, username: &str, password_hash: String) -> Result<(), StoreError> {
        match self.users.write().entry(username.to_string()) {
            Entry::Occupied(_) => Err(StoreError::UsernameTaken(username.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Credential {
                    username: username.to_string(),
                    password_hash,
                });
                debug!(username = %username, "User stored");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryUserStore::new();
        assert!(!store.exists("alice").await.unwrap());

        store.put("alice", "hash".to_string()).await.unwrap();

        assert!(store.exists("alice").await.unwrap());
        let credential = store.get("alice").await.unwrap().unwrap();
        assert_eq!(credential.username, "alice");
        assert_eq!(credential.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_put_is_insert_if_absent() {
        let store = InMemoryUserStore::new();
        store.put("alice", "first".to_string()).await.unwrap();

        let err = store.put("alice", "second".to_string()).await.unwrap_err();

        assert!(matches!(err, StoreError::UsernameTaken(ref name) if name == "alice"));
        assert_eq!(store.get("alice").await.unwrap().unwrap().password_hash, "first");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let store = InMemoryUserStore::new();
        assert!(store.get("nobody").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
