use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::display::ScreenId;
use crate::error::{CoreError, Result};

/// Run-wide switches shared by the schedulers and the procedure state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Re-run units that finished with an ERROR code.
    pub repeat_error_trials: bool,
    /// Keep a record of every presentation in the scheduler summary.
    pub record_presentations: bool,
    /// Margin left to the spin phases when sleeping towards a deadline.
    pub sleep_bound_ms: u64,
    /// Below this distance to a deadline the wait busy-spins.
    pub yield_bound_ms: u64,
    /// Refresh rate of the fixed-rate vertical sync source.
    pub refresh_rate_hz: f64,
    pub screen: ScreenId,
    /// Seed for randomized sibling insertion; entropy when absent.
    pub seed: Option<u64>,
    /// Log every unit entry and exit at debug level.
    pub trace_units: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            repeat_error_trials: false,
            record_presentations: false,
            sleep_bound_ms: 20,
            yield_bound_ms: 2,
            refresh_rate_hz: 60.0,
            screen: ScreenId(0),
            seed: None,
            trace_units: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.yield_bound_ms > self.sleep_bound_ms {
            return Err(CoreError::Configuration(format!(
                "yield_bound_ms ({}) exceeds sleep_bound_ms ({})",
                self.yield_bound_ms, self.sleep_bound_ms
            )));
        }
        if self.refresh_rate_hz.is_nan() || self.refresh_rate_hz <= 0.0 {
            return Err(CoreError::Configuration(format!(
                "refresh_rate_hz must be positive, got {}",
                self.refresh_rate_hz
            )));
        }
        Ok(())
    }

    /// Nominal refresh period in nanoseconds.
    pub fn refresh_period_nanos(&self) -> u64 {
        (1e9 / self.refresh_rate_hz).round() as u64
    }
}
