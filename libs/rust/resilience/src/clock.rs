//! Injectable time source.
//!
//! Every time-gated state machine in this crate reads the current instant
//! through [`Clock`] instead of calling `Utc::now()` directly. Production code
//! passes [`SystemClock`]; tests pass a [`ManualClock`] and fast-forward it.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since `earlier`, saturating at zero if the clock went backwards.
    fn elapsed_since(&self, earlier: DateTime<Utc>) -> Duration {
        (self.now() - earlier).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Monotonic clock reported in UTC.
///
/// The wall-clock time is read once at construction; after that the clock
/// advances with [`Instant`], so NTP steps and manual clock changes never move
/// it backwards or make it jump.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor: DateTime<Utc>,
    started: Instant,
}

impl SystemClock {
    /// Anchors a new clock at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.anchor.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// and give another to the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at the current wall-clock time, truncated to
    /// whole seconds so millisecond-resolution timestamps land exactly on it.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now().trunc_subsecs(0))
    }

    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let Ok(delta) = TimeDelta::from_std(by) else {
            return;
        };
        let mut now = self.now.lock();
        if let Some(next) = now.checked_add_signed(delta) {
            *now = next;
        }
    }

    /// Sets the clock to an absolute instant, which may be in the past.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.elapsed_since(start), Duration::from_millis(1500));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        let start = clock.now();

        handle.advance(Duration::from_secs(10));

        assert_eq!(clock.elapsed_since(start), Duration::from_secs(10));
    }

    #[test]
    fn test_elapsed_saturates_when_clock_goes_backwards() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.set(start - TimeDelta::seconds(5));

        assert_eq!(clock.elapsed_since(start), Duration::ZERO);
    }

    #[test]
    fn test_system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let mut previous = clock.now();

        for _ in 0..1_000 {
            let now = clock.now();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn test_system_clock_tracks_elapsed_time() {
        let clock = SystemClock::new();
        let start = clock.now();

        std::thread::sleep(Duration::from_millis(20));

        assert!(clock.elapsed_since(start) >= Duration::from_millis(20));
        assert!((start - Utc::now()).num_seconds().abs() < 5);
    }

    #[test]
    fn test_manual_clock_starts_on_whole_second() {
        use chrono::Timelike;
        assert_eq!(ManualClock::new().now().nanosecond(), 0);
    }
}
