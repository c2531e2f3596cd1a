//! Clock implementations for the tessera scheduler

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic time source, measured from the clock's own epoch
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch
    fn now(&self) -> Duration;

    /// Jump forward to `target`, if this clock can be driven.
    /// Returns false for clocks that follow real time.
    fn advance_to(&self, _target: Duration) -> bool {
        false
    }
}

/// System clock - follows the OS monotonic clock
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Manual clock - only moves when told to.
/// INVARIANT: never moves backwards
#[derive(Default)]
pub struct ManualClock {
    value: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    /// Advance by `dt`, returning the new time
    pub fn advance(&self, dt: Duration) -> Duration {
        let mut value = self.value.lock();
        *value = value.saturating_add(dt);
        *value
    }

    /// Set the time; earlier values are ignored
    pub fn set(&self, target: Duration) {
        let mut value = self.value.lock();
        if target > *value {
            *value = target;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.value.lock()
    }

    fn advance_to(&self, target: Duration) -> bool {
        self.set(target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();

        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();

        assert!(t2 > t1);
        assert!(!clock.advance_to(Duration::from_secs(60)));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(10));

        assert!(clock.advance_to(Duration::from_millis(25)));
        assert_eq!(clock.now(), Duration::from_millis(25));
    }

    #[test]
    fn test_manual_clock_never_rewinds() {
        let clock = ManualClock::new();
        clock.set(Duration::from_millis(50));
        clock.set(Duration::from_millis(20));
        assert_eq!(clock.now(), Duration::from_millis(50));
    }
}
