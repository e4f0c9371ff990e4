//! Circuit Breaker State Management
//!
//! Pure transition logic. Callers hold the breaker's lock while calling into
//! this module and never across the protected operation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow through normally
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Circuit is admitting a single trial call to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by one of the transition functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Outcome of asking the breaker for permission to call through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may proceed. `trial` is set for the half-open trial call and
    /// `generation` identifies the state the call was admitted under.
    Admitted { trial: bool, generation: u64 },
    /// The call must fail fast.
    Rejected { retry_after: Duration },
}

/// Internal state for the circuit breaker
#[derive(Debug)]
pub(crate) struct BreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub trial_in_flight: bool,
    /// Bumped on reset and whenever a trial settles. Results carrying an
    /// older generation are discarded.
    pub generation: u64,
}

/// Fallback hint when a rejection has no natural reopen time.
const BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

impl BreakerState {
    pub const fn new() -> Self {
        Self::with_generation(0)
    }

    const fn with_generation(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            generation,
        }
    }

    /// Force the circuit closed, orphaning every call still in flight.
    pub fn reset(&mut self) -> CircuitState {
        let previous = self.state;
        *self = Self::with_generation(self.generation.wrapping_add(1));
        previous
    }

    /// Decide whether a call may proceed, performing the lazy Open -> HalfOpen
    /// transition when the reset timeout has elapsed.
    pub fn admit(
        &mut self,
        now: DateTime<Utc>,
        reset_timeout: Duration,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (self.admitted(false), None),
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    (Admission::Rejected { retry_after: BUSY_RETRY_AFTER }, None)
                } else {
                    self.trial_in_flight = true;
                    (self.admitted(true), None)
                }
            }
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .and_then(|opened| (now - opened).to_std().ok())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= reset_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    let transition = Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    };
                    (self.admitted(true), Some(transition))
                } else {
                    let retry_after = reset_timeout.saturating_sub(elapsed);
                    (Admission::Rejected { retry_after }, None)
                }
            }
        }
    }

    const fn admitted(&self, trial: bool) -> Admission {
        Admission::Admitted {
            trial,
            generation: self.generation,
        }
    }

    /// Record a successful call
    pub fn record_success(&mut self, trial: bool, generation: u64) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen if trial => {
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.trial_in_flight = false;
                self.generation = self.generation.wrapping_add(1);
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            // Late results from calls admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    /// Record a failed call
    pub fn record_failure(
        &mut self,
        trial: bool,
        generation: u64,
        now: DateTime<Utc>,
        failure_threshold: u32,
    ) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    Some(Transition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if trial => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.trial_in_flight = false;
                self.generation = self.generation.wrapping_add(1);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::new()
    }
}
