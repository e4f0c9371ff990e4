//! External dependency guarded by the gateway's circuit breaker.

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to the external dependency.
#[derive(Error, Debug)]
pub enum DependencyError {
    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dependency did not answer in time
    #[error("Dependency timed out")]
    Timeout,

    /// Dependency answered with an error
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// An external call the gateway protects with a circuit breaker.
#[async_trait]
pub trait ExternalDependency: Send + Sync {
    /// Name used for the breaker and in logs.
    fn name(&self) -> &str {
        "external"
    }

    /// Performs the call.
    async fn call(&self) -> Result<String, DependencyError>;
}

/// Dependency that always answers with a fixed payload.
#[derive(Debug, Clone)]
pub struct StaticDependency {
    payload: String,
}

impl StaticDependency {
    /// Answers with `payload`.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl Default for StaticDependency {
    fn default() -> Self {
        Self::new("hello")
    }
}

#[async_trait]
impl ExternalDependency for StaticDependency {
    async fn call(&self) -> Result<String, DependencyError> {
        Ok(self.payload.clone())
    }
}
