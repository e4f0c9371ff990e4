//! Circuit breaker for calls to an unreliable external dependency.
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐  reset_timeout, next call  ┌──────────┐
//! │ Closed │ ───── reached ────→ │ Open │ ─────────────────────────→ │ HalfOpen │
//! └────────┘                     └──────┘ ←──── trial fails ──────── └──────────┘
//!      ↑                                                                   │
//!      └────────────────────────── trial succeeds ─────────────────────────┘
//! ```
//!
//! The Open -> HalfOpen check is lazy: it happens on the next incoming call,
//! never on a timer. While half-open exactly one trial call is in flight and
//! every other caller fails fast.
//!
//! Only `Err` results count as failures. A call that returns `Ok` is a
//! success whatever its payload says; interpreting the payload is the
//! caller's job. Timeouts from [`CircuitBreaker::call_with_timeout`] and
//! admitted calls whose futures are dropped before completing are failures.

mod state;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ResilienceError;

use state::{Admission, BreakerState, Transition};
pub use state::CircuitState;

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time the circuit stays open before admitting a trial call.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(10);

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with custom failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Create a new config with custom reset timeout.
    #[must_use]
    pub const fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::invalid_config(
                "failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(ResilienceError::invalid_config(
                "reset_timeout",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or a half-open trial is already in flight); the
    /// operation was not invoked
    #[error("Circuit open for {name}, retry after {retry_after:?}")]
    Open {
        /// Breaker name
        name: String,
        /// Hint for when the circuit may admit calls again
        retry_after: Duration,
    },

    /// The operation did not complete within the allotted time
    #[error("Call through {name} timed out after {after:?}")]
    Timeout {
        /// Breaker name
        name: String,
        /// The timeout that elapsed
        after: Duration,
    },

    /// The underlying operation returned an error
    #[error("Service error: {0}")]
    Failed(#[source] E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected without invoking the operation.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns the operation's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Receives state changes and fast-fail rejections, e.g. for metrics.
pub trait BreakerObserver: Send + Sync {
    /// Called after every state transition.
    fn on_transition(&self, name: &str, from: CircuitState, to: CircuitState);

    /// Called when a call is rejected without reaching the operation.
    fn on_rejected(&self, _name: &str) {}
}

/// Point-in-time view of a breaker's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted while closed
    pub consecutive_failures: u32,
    /// When the circuit last opened, if it is open or half-open
    pub opened_at: Option<DateTime<Utc>>,
}

/// Thread-safe circuit breaker guarding one external dependency.
///
/// Clones share state. The internal lock is held only around state reads and
/// writes, never across the protected call.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<BreakerState>>,
    observer: Option<Arc<dyn BreakerObserver>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given configuration.
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;
        let name: String = name.into();
        Ok(Self {
            name: name.into(),
            config,
            clock,
            state: Arc::new(Mutex::new(BreakerState::new())),
            observer: None,
        })
    }

    /// Attaches an observer notified of transitions and rejections.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BreakerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration this breaker was built with
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gets the current circuit state without performing the lazy reopen check.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Gets the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Gets a consistent view of state, failure count and open time.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
        }
    }

    /// Forces the circuit back to closed.
    pub fn reset(&self) {
        let previous = self.state.lock().reset();
        if previous != CircuitState::Closed {
            self.notify(Transition {
                from: previous,
                to: CircuitState::Closed,
            });
        }
    }

    /// Executes an async operation with circuit breaker protection.
    ///
    /// `op` is not invoked at all when the circuit rejects the call.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;

        match op().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                permit.fail();
                Err(CircuitBreakerError::Failed(err))
            }
        }
    }

    /// Like [`call`](Self::call), but a call running longer than `timeout`
    /// is abandoned and recorded as a failure.
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;

        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                permit.succeed();
                Ok(value)
            }
            Ok(Err(err)) => {
                permit.fail();
                Err(CircuitBreakerError::Failed(err))
            }
            Err(_) => {
                permit.fail();
                warn!(circuit = %self.name, timeout = ?timeout, "Protected call timed out");
                Err(CircuitBreakerError::Timeout {
                    name: self.name.to_string(),
                    after: timeout,
                })
            }
        }
    }

    fn acquire<E>(&self) -> Result<CallPermit<'_>, CircuitBreakerError<E>> {
        let now = self.clock.now();
        let (admission, transition) = self.state.lock().admit(now, self.config.reset_timeout);

        if let Some(transition) = transition {
            self.notify(transition);
        }

        match admission {
            Admission::Admitted { trial, generation } => Ok(CallPermit {
                breaker: self,
                trial,
                generation,
                settled: false,
            }),
            Admission::Rejected { retry_after } => {
                debug!(circuit = %self.name, retry_after = ?retry_after, "Call rejected by open circuit");
                if let Some(observer) = &self.observer {
                    observer.on_rejected(&self.name);
                }
                Err(CircuitBreakerError::Open {
                    name: self.name.to_string(),
                    retry_after,
                })
            }
        }
    }

    fn record(&self, success: bool, permit: &CallPermit<'_>) {
        let transition = {
            let mut state = self.state.lock();
            if success {
                state.record_success(permit.trial, permit.generation)
            } else {
                state.record_failure(
                    permit.trial,
                    permit.generation,
                    self.clock.now(),
                    self.config.failure_threshold,
                )
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    fn notify(&self, transition: Transition) {
        match transition.to {
            CircuitState::Open if transition.from == CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Circuit re-opened after failed trial call");
            }
            CircuitState::Open => {
                warn!(
                    circuit = %self.name,
                    failures = self.config.failure_threshold,
                    "Circuit opened due to failures"
                );
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "Circuit transitioning to half-open");
            }
            CircuitState::Closed => {
                info!(circuit = %self.name, from = %transition.from, "Circuit closed");
            }
        }

        if let Some(observer) = &self.observer {
            observer.on_transition(&self.name, transition.from, transition.to);
        }
    }
}

/// Admission ticket for one call. Dropping it unsettled records a failure,
/// which covers callers that cancel the protected future. Results are tied to
/// the generation they were admitted under, so a call that outlives a reset
/// or a settled trial cannot touch the newer state.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record(true, &self);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record(false, &self);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(circuit = %self.breaker.name, "Protected call dropped before completion");
            self.breaker.record(false, self);
        }
    }
}
