use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::sleep::coarse_sleep;

/// Longest single coarse sleep, so a wake is noticed eventually.
const SLEEP_SLICE: Duration = Duration::from_millis(50);
/// Coarse sleep slice while an input poll is attached.
const POLL_SLICE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// The coarse sleep stops this far ahead of the deadline.
    pub sleep_bound: Duration,
    /// The yield phase stops this far ahead of the deadline; the rest is
    /// busy-spun.
    pub yield_bound: Duration,
}

impl WaitConfig {
    pub fn from_millis(sleep_bound_ms: u64, yield_bound_ms: u64) -> Self {
        Self {
            sleep_bound: Duration::from_millis(sleep_bound_ms),
            yield_bound: Duration::from_millis(yield_bound_ms),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::from_millis(20, 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The deadline passed.
    Reached,
    /// Woken before the deadline.
    Woken,
    /// The poll callback reported an event before the deadline.
    Polled,
}

/// Cross-thread handle that aborts waits on its [`WaitLock`].
#[derive(Debug, Clone)]
pub struct Waker {
    flag: Arc<AtomicBool>,
}

impl Waker {
    pub fn wake(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// Hybrid sleep/yield/spin wait towards absolute clock deadlines.
///
/// Waking is sticky: once woken every wait returns immediately until
/// [`WaitLock::rearm`] is called.
#[derive(Debug, Clone)]
pub struct WaitLock<C: Clock = MonotonicClock> {
    clock: C,
    config: WaitConfig,
    woken: Arc<AtomicBool>,
}

impl WaitLock<MonotonicClock> {
    pub fn monotonic(config: WaitConfig) -> Self {
        Self::new(MonotonicClock::new(), config)
    }
}

impl<C: Clock> WaitLock<C> {
    pub fn new(clock: C, config: WaitConfig) -> Self {
        Self {
            clock,
            config,
            woken: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn config(&self) -> WaitConfig {
        self.config
    }

    pub fn wake(&self) {
        self.woken.store(true, Ordering::Release);
    }

    pub fn waker(&self) -> Waker {
        Waker {
            flag: Arc::clone(&self.woken),
        }
    }

    pub fn is_woken(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }

    pub fn rearm(&self) {
        self.woken.store(false, Ordering::Release);
    }

    /// Blocks until `deadline` (clock nanoseconds) or a wake.
    pub fn wait_until(&self, deadline: u64) -> WaitOutcome {
        self.wait_inner(deadline, SLEEP_SLICE, || false)
    }

    /// Like [`WaitLock::wait_until`] but calls `poll` on every iteration of
    /// every phase. A `true` from `poll` ends the wait early.
    pub fn wait_for(&self, deadline: u64, poll: impl FnMut() -> bool) -> WaitOutcome {
        self.wait_inner(deadline, POLL_SLICE, poll)
    }

    fn wait_inner(
        &self,
        deadline: u64,
        slice: Duration,
        mut poll: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let sleep_bound = self.config.sleep_bound.as_nanos() as u64;
        let yield_bound = self.config.yield_bound.as_nanos() as u64;

        loop {
            if self.is_woken() {
                return WaitOutcome::Woken;
            }
            if poll() {
                return WaitOutcome::Polled;
            }
            let now = self.clock.now();
            if now >= deadline {
                return WaitOutcome::Reached;
            }
            let remaining = deadline - now;
            if remaining <= sleep_bound {
                break;
            }
            coarse_sleep(Duration::from_nanos(remaining - sleep_bound).min(slice));
        }

        loop {
            if self.is_woken() {
                return WaitOutcome::Woken;
            }
            if poll() {
                return WaitOutcome::Polled;
            }
            let now = self.clock.now();
            if now >= deadline {
                return WaitOutcome::Reached;
            }
            if deadline - now <= yield_bound {
                break;
            }
            std::thread::yield_now();
        }

        loop {
            if self.is_woken() {
                return WaitOutcome::Woken;
            }
            if poll() {
                return WaitOutcome::Polled;
            }
            if self.clock.now() >= deadline {
                return WaitOutcome::Reached;
            }
            std::hint::spin_loop();
        }
    }
}
