use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

/// Bounded history of intervals between consecutive presentations.
#[derive(Debug, Clone)]
pub struct FrameTimes {
    frame_times: VecDeque<Duration>,
    max_samples: usize,
}

impl FrameTimes {
    pub fn new(max_samples: usize) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(d);
    }

    pub fn len(&self) -> usize {
        self.frame_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_times.is_empty()
    }

    pub fn calibration_stats(&self) -> CalibrationStats {
        if self.frame_times.is_empty() {
            return CalibrationStats::default();
        }
        let n = self.frame_times.len() as f64;
        let times = self.frame_times.iter().map(|d| d.as_nanos() as f64);

        let avg = times.clone().sum::<f64>() / n;
        let var = times.clone().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = times.clone().fold(f64::INFINITY, f64::min);
        let max = times.fold(f64::NEG_INFINITY, f64::max);

        CalibrationStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

impl Default for FrameTimes {
    fn default() -> Self {
        Self::new(1000)
    }
}
