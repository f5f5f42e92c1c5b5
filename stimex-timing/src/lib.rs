pub mod clock;
pub mod sleep;
pub mod stats;
pub mod wait;

pub use clock::{Clock, GRANULARITY_SAMPLES, Granularity, MonotonicClock, measure_granularity};
pub use stats::{CalibrationStats, FrameTimes};
pub use wait::{WaitConfig, WaitLock, WaitOutcome, Waker};
