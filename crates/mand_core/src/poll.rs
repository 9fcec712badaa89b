use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::error::{BridgeError, Result};

/// Monotonic time source used to measure polls.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Waits between two polls.
pub trait Delay {
    fn pause(&mut self, interval: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn pause(&mut self, interval: Duration) {
        (**self).pause(interval)
    }
}

/// Delay that only issues a spin-loop hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

impl Delay for SpinDelay {
    #[inline(always)]
    fn pause(&mut self, _interval: Duration) {
        core::hint::spin_loop();
    }
}

/// Clock that advances by a fixed step every time it is read.
///
/// Makes timeouts deterministic in simulation: with a step of one
/// millisecond, a poll with a ten millisecond timeout ends after a known
/// number of reads.
#[derive(Debug)]
pub struct TickClock {
    now: Cell<Duration>,
    step: Duration,
}

impl TickClock {
    /// A clock at zero that advances by `step` on every read.
    pub const fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            step,
        }
    }
}

impl Clock for TickClock {
    fn now(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two polls. Zero means spin.
    pub interval: Duration,
    /// Give up once this much time has passed.
    pub timeout: Option<Duration>,
    /// Give up after this many polls.
    pub max_polls: Option<u64>,
}

impl PollPolicy {
    /// Unbounded tight spin.
    pub const SPIN: Self = Self {
        interval: Duration::ZERO,
        timeout: None,
        max_polls: None,
    };

    /// Pause `interval` between two polls instead of spinning.
    ///
    /// The pause goes through the poller's [`Delay`], so whether it sleeps
    /// or busy-waits is up to the caller.
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Give up once `timeout` has passed since the first poll.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Give up after `max_polls` reads that saw the core busy.
    pub const fn with_max_polls(mut self, max_polls: u64) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Whether the policy ends a poll of a core that never finishes.
    pub const fn is_bounded(&self) -> bool {
        self.timeout.is_some() || self.max_polls.is_some()
    }
}

impl Default for PollPolicy {
    /// Spin for at most one second.
    fn default() -> Self {
        Self::SPIN.with_timeout(Duration::from_secs(1))
    }
}

/// Outcome of a poll that saw the core finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Number of status reads, including the one that saw the core idle.
    pub polls: u64,
    /// Wall-clock time from the first read to the idle read.
    pub elapsed: Duration,
}

/// Runs poll loops under a [`PollPolicy`].
pub struct Poller<'a, C, D> {
    policy: PollPolicy,
    clock: C,
    delay: D,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, C: Clock, D: Delay> Poller<'a, C, D> {
    /// A poller measuring time with `clock` and pausing with `delay`.
    pub fn new(policy: PollPolicy, clock: C, delay: D) -> Self {
        Self {
            policy,
            clock,
            delay,
            cancel: None,
        }
    }

    /// Ends any poll early once `flag` reads `true`.
    pub fn with_cancel<'b>(self, flag: &'b AtomicBool) -> Poller<'b, C, D> {
        Poller {
            policy: self.policy,
            clock: self.clock,
            delay: self.delay,
            cancel: Some(flag),
        }
    }

    /// The policy bounding every poll of this poller.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Calls `is_idle` until it returns `true` or the policy gives up.
    ///
    /// Returns on the first call that reports idle. `core` is only used to
    /// describe a timeout or cancellation.
    pub fn poll_until<F>(&mut self, core: usize, mut is_idle: F) -> Result<PollReport>
    where
        F: FnMut() -> Result<bool>,
    {
        let start = self.clock.now();
        let mut polls = 0u64;

        loop {
            if self.cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                return Err(BridgeError::Cancelled { core, polls });
            }

            polls += 1;
            if is_idle()? {
                let elapsed = self.clock.now().saturating_sub(start);
                return Ok(PollReport { polls, elapsed });
            }

            let elapsed = self.clock.now().saturating_sub(start);
            let timed_out = self.policy.timeout.is_some_and(|limit| elapsed >= limit);
            let exhausted = self.policy.max_polls.is_some_and(|limit| polls >= limit);
            if timed_out || exhausted {
                return Err(BridgeError::TimedOut {
                    core,
                    polls,
                    elapsed,
                });
            }

            if self.policy.interval.is_zero() {
                core::hint::spin_loop();
            } else {
                self.delay.pause(self.policy.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingDelay {
        pauses: u32,
    }

    impl Delay for CountingDelay {
        fn pause(&mut self, _interval: Duration) {
            self.pauses += 1;
        }
    }

    #[test]
    fn returns_on_first_idle_read() {
        let mut poller = Poller::new(
            PollPolicy::SPIN,
            TickClock::new(Duration::from_micros(1)),
            SpinDelay,
        );
        let mut reads = 0;
        let report = poller
            .poll_until(0, || {
                reads += 1;
                Ok(reads > 5)
            })
            .unwrap();
        assert_eq!(report.polls, 6);
        assert_eq!(reads, 6);
    }

    #[test]
    fn times_out_on_the_clock() {
        let policy = PollPolicy::SPIN.with_timeout(Duration::from_millis(10));
        let mut poller = Poller::new(policy, TickClock::new(Duration::from_millis(1)), SpinDelay);
        let err = poller.poll_until(3, || Ok(false)).unwrap_err();
        match err {
            BridgeError::TimedOut { core, polls, elapsed } => {
                assert_eq!(core, 3);
                assert!(elapsed >= Duration::from_millis(10));
                assert!(polls >= 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn gives_up_after_max_polls() {
        let policy = PollPolicy::SPIN.with_max_polls(4);
        let mut poller = Poller::new(policy, TickClock::new(Duration::ZERO), SpinDelay);
        let err = poller.poll_until(1, || Ok(false)).unwrap_err();
        assert!(matches!(err, BridgeError::TimedOut { polls: 4, .. }));
    }

    #[test]
    fn pauses_between_polls_when_an_interval_is_set() {
        let policy = PollPolicy::SPIN.with_interval(Duration::from_micros(50));
        let mut delay = CountingDelay::default();
        let mut poller = Poller::new(policy, TickClock::new(Duration::ZERO), &mut delay);
        let mut reads = 0;
        poller
            .poll_until(0, || {
                reads += 1;
                Ok(reads == 3)
            })
            .unwrap();
        drop(poller);
        assert_eq!(delay.pauses, 2);
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let cancel = AtomicBool::new(false);
        let mut poller = Poller::new(PollPolicy::SPIN, TickClock::new(Duration::ZERO), SpinDelay)
            .with_cancel(&cancel);
        let mut reads = 0u64;
        let err = poller
            .poll_until(2, || {
                reads += 1;
                if reads == 7 {
                    cancel.store(true, Ordering::Release);
                }
                Ok(false)
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::Cancelled { core: 2, polls: 7 });
    }

    #[test]
    fn default_policy_is_bounded() {
        assert!(PollPolicy::default().is_bounded());
        assert!(!PollPolicy::SPIN.is_bounded());
    }
}
