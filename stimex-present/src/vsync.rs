use stimex_timing::{Clock, WaitLock, WaitOutcome};

/// Source of vertical-blank edges.
pub trait VerticalSync: Send {
    /// Blocks until the next vertical-blank edge and returns its time, or
    /// `None` when the wait was woken.
    fn wait_for_blank<C: Clock>(&mut self, lock: &WaitLock<C>) -> Option<u64>;
}

/// Vertical blank derived from a nominal refresh period.
///
/// Edges fall at `phase + k * period` on the scheduler's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRateSync {
    period: u64,
    phase: u64,
}

impl FixedRateSync {
    pub fn new(period_nanos: u64) -> Self {
        Self::with_phase(period_nanos, 0)
    }

    pub fn from_hz(refresh_rate_hz: f64) -> Self {
        Self::new((1e9 / refresh_rate_hz).round() as u64)
    }

    pub fn with_phase(period_nanos: u64, phase: u64) -> Self {
        Self {
            period: period_nanos.max(1),
            phase,
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// First edge strictly after `now`.
    pub fn next_edge(&self, now: u64) -> u64 {
        if now < self.phase {
            return self.phase;
        }
        let since = now - self.phase;
        self.phase + (since / self.period + 1) * self.period
    }
}

impl VerticalSync for FixedRateSync {
    fn wait_for_blank<C: Clock>(&mut self, lock: &WaitLock<C>) -> Option<u64> {
        let edge = self.next_edge(lock.now());
        match lock.wait_until(edge) {
            WaitOutcome::Reached => Some(edge),
            WaitOutcome::Woken | WaitOutcome::Polled => None,
        }
    }
}
