//! Observability Module
//!
//! Prometheus metrics for the gateway. Log setup lives in
//! [`auth_resilience::tracing_config`].

pub mod metrics;

pub use metrics::GatewayMetrics;
