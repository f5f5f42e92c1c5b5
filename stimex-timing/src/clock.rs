use std::time::{Duration, Instant};

/// Number of distinct consecutive readings sampled by [`measure_granularity`].
pub const GRANULARITY_SAMPLES: usize = 20;

/// Monotonic nanosecond time source.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Nanoseconds since the clock's origin. Never decreases.
    fn now(&self) -> u64;

    fn elapsed(&self, since: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(since))
    }
}

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

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Observed resolution of a clock. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Granularity {
    /// Mean distance between consecutive distinct readings.
    pub step_nanos: f64,
    /// Mean number of `now()` calls returning the same reading.
    pub calls_per_step: f64,
}

/// Busy-samples `clock` until [`GRANULARITY_SAMPLES`] distinct steps were
/// seen and averages them.
pub fn measure_granularity<C: Clock>(clock: &C) -> Granularity {
    let mut last = clock.now();
    // Align to a step edge so the first interval is a whole step.
    loop {
        let t = clock.now();
        if t != last {
            last = t;
            break;
        }
    }

    let start = last;
    let mut calls: u64 = 0;
    for _ in 0..GRANULARITY_SAMPLES {
        loop {
            calls += 1;
            let t = clock.now();
            if t != last {
                last = t;
                break;
            }
        }
    }

    let n = GRANULARITY_SAMPLES as f64;
    let granularity = Granularity {
        step_nanos: (last - start) as f64 / n,
        calls_per_step: calls as f64 / n,
    };
    tracing::debug!(
        "clock granularity: {:.1} ns/step, {:.1} calls/step",
        granularity.step_nanos,
        granularity.calls_per_step
    );
    granularity
}
