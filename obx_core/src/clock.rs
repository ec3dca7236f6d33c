//! Monotonic host clock.
//!
//! The engine timestamps inbound MIDI and feeds clock-recovery updates with
//! a seconds-denominated monotonic time. Hosts may supply their own clock;
//! this is the default implementation behind that contract.

use std::time::Instant;

/// Monotonic clock reporting seconds since construction as `f64`.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since construction.
    ///
    /// Backed by `Instant`, so it never goes backwards. The fractional part
    /// carries sub-microsecond resolution on common platforms.
    #[inline]
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_starts_near_zero() {
        let clock = MonotonicClock::new();
        assert!(clock.now() < 0.5);
    }

    #[test]
    fn test_now_increases() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
