//! Auth Gateway - registration, rate-limited login, bearer token checks and a
//! circuit-breaker-protected dependency call.
//!
//! This crate wires the resilience primitives from `auth-resilience` into the
//! request paths of an authentication service. HTTP routing is left to the
//! embedding server; [`GatewayError::http_status`] carries the status mapping.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dependency;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod store;
pub mod token;

pub use config::{ConfigError, GatewayConfig};
pub use dependency::{DependencyError, ExternalDependency, StaticDependency};
pub use error::{ErrorCode, ErrorResponse, GatewayError};
pub use gateway::{AccessToken, AuthGateway, AuthGatewayBuilder};
pub use observability::GatewayMetrics;
pub use store::{
    Argon2Hasher, Credential, HashError, InMemoryUserStore, PasswordHasher, StoreError, UserStore,
};
pub use token::{Token, TokenError, TokenService};
