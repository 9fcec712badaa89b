use std::thread;
use std::time::{Duration, Instant};

use mand_core::poll::{Clock, Delay};

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Sleeps the thread between polls, freeing the CPU at the cost of latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepDelay;

impl Delay for SleepDelay {
    fn pause(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

/// Busy-waits on the monotonic clock.
///
/// Waits of a few nanoseconds, such as the register write settle time, are
/// far below the granularity of [`SleepDelay`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait;

impl Delay for SpinWait {
    fn pause(&mut self, interval: Duration) {
        let start = Instant::now();
        while start.elapsed() < interval {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        SleepDelay.pause(Duration::from_millis(2));
        assert!(clock.now() >= first + Duration::from_millis(2));
    }

    #[test]
    fn spin_wait_covers_the_interval() {
        let start = Instant::now();
        SpinWait.pause(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
        SpinWait.pause(Duration::ZERO);
    }
}
