//! Gateway Metrics
//!
//! Provides Prometheus metrics for circuit breaker state changes, rate limit
//! decisions and returned errors.

use auth_resilience::{BreakerObserver, CircuitState, RateLimitDecision};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

use crate::error::ErrorCode;

const NAMESPACE: &str = "auth_gateway";

/// Gateway metrics
#[derive(Clone)]
pub struct GatewayMetrics {
    /// State changes counter
    pub state_changes: CounterVec,
    /// Current state gauge (0=closed, 1=open, 2=half-open)
    pub current_state: GaugeVec,
    /// Calls rejected without reaching the dependency
    pub rejections: CounterVec,
    /// Login rate limit decisions
    pub rate_limit_decisions: CounterVec,
    /// Errors returned by the gateway, by code
    pub errors: CounterVec,
}

impl GatewayMetrics {
    /// Creates new gateway metrics registered with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let state_changes = CounterVec::new(
            Opts::new("circuit_breaker_state_changes_total", "Total circuit breaker state changes")
                .namespace(NAMESPACE),
            &["circuit", "from_state", "to_state"],
        )?;
        registry.register(Box::new(state_changes.clone()))?;

        let current_state = GaugeVec::new(
            Opts::new("circuit_breaker_state", "Current circuit breaker state")
                .namespace(NAMESPACE),
            &["circuit"],
        )?;
        registry.register(Box::new(current_state.clone()))?;

        let rejections = CounterVec::new(
            Opts::new(
                "circuit_breaker_rejections_total",
                "Calls rejected by an open circuit",
            )
            .namespace(NAMESPACE),
            &["circuit"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let rate_limit_decisions = CounterVec::new(
            Opts::new("rate_limit_decisions_total", "Login rate limit decisions")
                .namespace(NAMESPACE),
            &["decision"],
        )?;
        registry.register(Box::new(rate_limit_decisions.clone()))?;

        let errors = CounterVec::new(
            Opts::new("errors_total", "Total errors returned").namespace(NAMESPACE),
            &["code"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            state_changes,
            current_state,
            rejections,
            rate_limit_decisions,
            errors,
        })
    }

    /// Records a state change
    pub fn record_state_change(&self, circuit: &str, from: CircuitState, to: CircuitState) {
        self.state_changes
            .with_label_values(&[circuit, from.as_str(), to.as_str()])
            .inc();
        self.current_state
            .with_label_values(&[circuit])
            .set(state_value(to));
    }

    /// Records a rate limit decision
    pub fn record_rate_limit(&self, decision: &RateLimitDecision) {
        let label = if decision.is_allowed() { "allowed" } else { "denied" };
        self.rate_limit_decisions.with_label_values(&[label]).inc();
    }

    /// Records an error returned to a caller
    pub fn record_error(&self, code: ErrorCode) {
        self.errors.with_label_values(&[code.as_str()]).inc();
    }
}

impl BreakerObserver for GatewayMetrics {
    fn on_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        self.record_state_change(name, from, to);
    }

    fn on_rejected(&self, name: &str) {
        self.rejections.with_label_values(&[name]).inc();
    }
}

const fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_change_updates_gauge() {
        let registry = Registry::new();
        let metrics = GatewayMetrics::new(&registry).unwrap();

        metrics.on_transition("external", CircuitState::Closed, CircuitState::Open);
        assert!((metrics.current_state.with_label_values(&["external"]).get() - 1.0).abs() < f64::EPSILON);

        metrics.on_transition("external", CircuitState::Open, CircuitState::HalfOpen);
        assert!((metrics.current_state.with_label_values(&["external"]).get() - 2.0).abs() < f64::EPSILON);

        let opened = metrics
            .state_changes
            .with_label_values(&["external", "closed", "open"])
            .get();
        assert!((opened - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_limit_and_error_counters() {
        let registry = Registry::new();
        let metrics = GatewayMetrics::new(&registry).unwrap();

        metrics.record_rate_limit(&RateLimitDecision::Allowed { remaining: 2 });
        metrics.record_rate_limit(&RateLimitDecision::Denied {
            retry_after: Duration::from_secs(1),
        });
        metrics.record_error(ErrorCode::RateLimited);

        let denied = metrics.rate_limit_decisions.with_label_values(&["denied"]).get();
        let errors = metrics.errors.with_label_values(&["RATE_LIMITED"]).get();
        assert!((denied - 1.0).abs() < f64::EPSILON);
        assert!((errors - 1.0).abs() < f64::EPSILON);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        GatewayMetrics::new(&registry).unwrap();
        assert!(GatewayMetrics::new(&registry).is_err());
    }
}
