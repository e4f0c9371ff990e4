//! Request orchestration: registration, rate-limited login, token checks and
//! the circuit-breaker-protected dependency call.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use auth_resilience::{
    CircuitBreaker, CircuitBreakerError, Clock, RateLimitDecision, RateLimitInfo, RateLimiter,
    SystemClock, init_tracing,
};
use prometheus::Registry;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::dependency::{DependencyError, ExternalDependency, StaticDependency};
use crate::error::GatewayError;
use crate::observability::GatewayMetrics;
use crate::store::{Argon2Hasher, HashError, InMemoryUserStore, PasswordHasher, UserStore};
use crate::token::{Token, TokenError, TokenService};

/// Default upper bound on one dependency call.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(5);

/// Password hashed once and checked against when the username is unknown.
const DECOY_PASSWORD: &str = "decoy-password-for-unknown-users";

/// Login response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    /// Encoded bearer token
    pub access_token: String,
    /// Always `"bearer"`
    pub token_type: String,
}

impl AccessToken {
    /// Wraps an issued token for the wire.
    pub fn new(token: &Token) -> Result<Self, TokenError> {
        Ok(Self {
            access_token: token.encode()?,
            token_type: "bearer".to_string(),
        })
    }
}

/// Auth gateway wiring the user store, token service, login rate limiter and
/// dependency circuit breaker together.
pub struct AuthGateway {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    decoy_hash: Arc<OnceLock<Option<String>>>,
    tokens: TokenService,
    login_limiter: RateLimiter,
    breaker: CircuitBreaker,
    dependency: Arc<dyn ExternalDependency>,
    dependency_timeout: Duration,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGateway")
            .field("hasher", &self.hasher)
            .field("tokens", &self.tokens)
            .field("login_limiter", &self.login_limiter)
            .field("breaker", &self.breaker)
            .field("dependency_timeout", &self.dependency_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthGateway {
    /// Starts a builder from the three clock-driven components.
    #[must_use]
    pub fn builder(
        tokens: TokenService,
        login_limiter: RateLimiter,
        breaker: CircuitBreaker,
    ) -> AuthGatewayBuilder {
        AuthGatewayBuilder {
            tokens,
            login_limiter,
            breaker,
            store: None,
            hasher: None,
            dependency: None,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            metrics: None,
        }
    }

    /// Process entry point: installs the configured tracing subscriber and
    /// wires a gateway on the monotonic system clock.
    pub fn start(config: &GatewayConfig, registry: Option<&Registry>) -> anyhow::Result<Self> {
        init_tracing(&config.tracing_config());
        let gateway = Self::from_config(config, Arc::new(SystemClock::new()), registry)?;
        info!(
            dependency = %gateway.dependency.name(),
            token_ttl = ?gateway.tokens.default_ttl(),
            "Auth gateway started"
        );
        Ok(gateway)
    }

    /// Wires a gateway from configuration with in-memory storage and the
    /// static dependency. Metrics are registered when `registry` is given.
    pub fn from_config(
        config: &GatewayConfig,
        clock: Arc<dyn Clock>,
        registry: Option<&Registry>,
    ) -> anyhow::Result<Self> {
        let tokens = TokenService::new(&config.token_secret, Arc::clone(&clock))
            .and_then(|tokens| tokens.with_default_ttl(config.token_ttl()))
            .context("building token service")?;
        let login_limiter = RateLimiter::new(config.rate_limit_config(), Arc::clone(&clock))
            .context("building login rate limiter")?;

        let dependency: Arc<dyn ExternalDependency> = Arc::new(StaticDependency::default());
        let breaker = CircuitBreaker::new(dependency.name(), config.circuit_breaker_config(), clock)
            .context("building circuit breaker")?;

        let mut builder = Self::builder(tokens, login_limiter, breaker)
            .dependency(dependency)
            .dependency_timeout(config.dependency_timeout());

        if let Some(registry) = registry {
            let metrics = GatewayMetrics::new(registry).context("registering metrics")?;
            builder = builder.metrics(Arc::new(metrics));
        }

        Ok(builder.build())
    }

    /// Creates a user. The password is stored only as a hash.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        self.try_register(username, password)
            .await
            .map_err(|err| self.reject("register", err))
    }

    async fn try_register(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        if username.is_empty() {
            return Err(GatewayError::invalid_input("username must not be empty"));
        }
        if password.is_empty() {
            return Err(GatewayError::invalid_input("password must not be empty"));
        }
        if self.store.exists(username).await? {
            return Err(GatewayError::UsernameTaken {
                username: username.to_string(),
            });
        }

        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task")??;

        self.store.put(username, hash).await?;
        info!(username = %username, "User registered");
        Ok(())
    }

    /// Checks credentials and issues a token. Every attempt counts against
    /// `client_key`'s login rate limit, including ones that are rejected.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client_key: &str,
    ) -> Result<Token, GatewayError> {
        self.try_login(username, password, client_key)
            .await
            .map_err(|err| self.reject("login", err))
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        client_key: &str,
    ) -> Result<Token, GatewayError> {
        let decision = self.login_limiter.check(client_key);
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(&decision);
        }
        if let RateLimitDecision::Denied { retry_after } = decision {
            warn!(client_key = %client_key, retry_after = ?retry_after, "Login rate limit exceeded");
            return Err(GatewayError::RateLimited { retry_after });
        }

        let credential = self.store.get(username).await?;

        let hasher = Arc::clone(&self.hasher);
        let decoy_hash = Arc::clone(&self.decoy_hash);
        let password = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || -> Result<bool, HashError> {
            match credential {
                Some(credential) => hasher.verify(&password, &credential.password_hash),
                // Unknown users pay for a verification too, so response time
                // does not reveal which usernames exist.
                None => {
                    let decoy = decoy_hash.get_or_init(|| hasher.hash(DECOY_PASSWORD).ok());
                    if let Some(hash) = decoy {
                        hasher.verify(&password, hash)?;
                    }
                    Ok(false)
                }
            }
        })
        .await
        .context("password verification task")??;
        if !matches {
            return Err(GatewayError::InvalidCredentials);
        }

        let token = self.tokens.issue_default(username)?;
        info!(username = %username, expires_at = %token.expires_at(), "Login succeeded");
        Ok(token)
    }

    /// Logs in and returns the wire response body.
    pub async fn login_response(
        &self,
        username: &str,
        password: &str,
        client_key: &str,
    ) -> Result<AccessToken, GatewayError> {
        let token = self.login(username, password, client_key).await?;
        AccessToken::new(&token).map_err(|err| self.reject("login", err.into()))
    }

    /// Verifies a token and returns its subject.
    pub fn verify_request(&self, token: &Token) -> Result<String, GatewayError> {
        self.tokens
            .verify(token)
            .map_err(|err| self.reject("verify", err.into()))
    }

    /// Verifies the value of an `Authorization: Bearer ...` header.
    pub fn verify_bearer(&self, header: &str) -> Result<String, GatewayError> {
        let result = match bearer_token(header) {
            Some(raw) => self.tokens.verify_encoded(raw).map_err(GatewayError::from),
            None => Err(GatewayError::MalformedToken {
                reason: "expected Bearer scheme".to_string(),
            }),
        };
        result.map_err(|err| self.reject("verify", err))
    }

    /// Calls the external dependency through the circuit breaker.
    ///
    /// An open circuit, a failed call and a timed-out call all surface as
    /// [`GatewayError::ServiceUnavailable`].
    pub async fn call_protected_dependency(&self) -> Result<String, GatewayError> {
        let dependency = Arc::clone(&self.dependency);
        let result = self
            .breaker
            .call_with_timeout(self.dependency_timeout, || async move { dependency.call().await })
            .await;

        result.map_err(|err| {
            let err = self.collapse_breaker_error(err);
            self.record_error(&err);
            err
        })
    }

    fn collapse_breaker_error(&self, err: CircuitBreakerError<DependencyError>) -> GatewayError {
        match err {
            CircuitBreakerError::Open { name, retry_after } => {
                warn!(circuit = %name, retry_after = ?retry_after, "Dependency call rejected by open circuit");
                GatewayError::ServiceUnavailable {
                    service: name,
                    retry_after: Some(retry_after),
                }
            }
            CircuitBreakerError::Timeout { name, after } => {
                error!(circuit = %name, timeout = ?after, "Dependency call timed out");
                GatewayError::ServiceUnavailable {
                    service: name,
                    retry_after: None,
                }
            }
            CircuitBreakerError::Failed(cause) => {
                error!(circuit = %self.breaker.name(), error = %cause, "Dependency call failed");
                GatewayError::ServiceUnavailable {
                    service: self.breaker.name().to_string(),
                    retry_after: None,
                }
            }
        }
    }

    /// Current login rate limit state for `client_key`.
    #[must_use]
    pub fn login_rate_limit_info(&self, client_key: &str) -> RateLimitInfo {
        self.login_limiter.info(client_key)
    }

    /// The dependency circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The token service.
    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    fn reject(&self, operation: &'static str, err: GatewayError) -> GatewayError {
        if err.http_status() >= 500 {
            error!(operation, error_code = err.code().as_str(), error = %err, "Request failed");
        } else {
            warn!(operation, error_code = err.code().as_str(), error = %err, "Request rejected");
        }
        self.record_error(&err);
        err
    }

    fn record_error(&self, err: &GatewayError) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(err.code());
        }
    }
}

/// Builder for [`AuthGateway`].
pub struct AuthGatewayBuilder {
    tokens: TokenService,
    login_limiter: RateLimiter,
    breaker: CircuitBreaker,
    store: Option<Arc<dyn UserStore>>,
    hasher: Option<Arc<dyn PasswordHasher>>,
    dependency: Option<Arc<dyn ExternalDependency>>,
    dependency_timeout: Duration,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl fmt::Debug for AuthGatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGatewayBuilder")
            .field("tokens", &self.tokens)
            .field("breaker", &self.breaker)
            .field("dependency_timeout", &self.dependency_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthGatewayBuilder {
    /// User store; defaults to [`InMemoryUserStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Password hasher; defaults to [`Argon2Hasher`].
    #[must_use]
    pub fn hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Protected dependency; defaults to [`StaticDependency`].
    #[must_use]
    pub fn dependency(mut self, dependency: Arc<dyn ExternalDependency>) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Upper bound on one dependency call.
    #[must_use]
    pub const fn dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Metrics sink. Also becomes the breaker's observer, replacing any
    /// observer it already had.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the gateway.
    #[must_use]
    pub fn build(self) -> AuthGateway {
        let breaker = match &self.metrics {
            Some(metrics) => self.breaker.with_observer(metrics.clone()),
            None => self.breaker,
        };

        AuthGateway {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryUserStore::new())),
            hasher: self.hasher.unwrap_or_else(|| Arc::new(Argon2Hasher::new())),
            decoy_hash: Arc::new(OnceLock::new()),
            tokens: self.tokens,
            login_limiter: self.login_limiter,
            breaker,
            dependency: self
                .dependency
                .unwrap_or_else(|| Arc::new(StaticDependency::default())),
            dependency_timeout: self.dependency_timeout,
            metrics: self.metrics,
        }
    }
}

/// Extracts the token from an `Authorization` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  abc.def "), Some("abc.def"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc.def"), None);
    }

    #[test]
    fn test_access_token_shape() {
        let token = Token::from_parts(
            "alice".to_string(),
            chrono::DateTime::from_timestamp_millis(1_000).unwrap(),
            chrono::DateTime::from_timestamp_millis(2_000).unwrap(),
            vec![7; 32],
        );

        let body = serde_json::to_value(AccessToken::new(&token).unwrap()).unwrap();

        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["access_token"], token.encode().unwrap());
    }
}
