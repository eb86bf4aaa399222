//! Clock sources for elapsed playback time
//!
//! The transport never reads wall-clock time. Everything it knows about "now"
//! comes through [`Clock::now`], which only has to be monotonic. Values are
//! meaningful as differences, never as absolute timestamps.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time reference in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by [`Instant`], counting seconds since construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for simulation and tests
///
/// Cloning yields another handle to the same time value.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `seconds`
    pub fn starting_at(seconds: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(seconds.max(0.0))),
        }
    }

    /// Move time forward; negative or non-finite steps are ignored
    pub fn advance(&self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            *self.now.lock() += seconds;
        }
    }

    /// Jump to `seconds` if it is not in the past
    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock();
        if seconds.is_finite() && seconds > *now {
            *now = seconds;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();

        clock.advance(1.5);
        assert_eq!(other.now(), 1.5);

        // Going backwards is refused
        other.set(0.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(-3.0);
        assert_eq!(clock.now(), 1.5);
    }
}
