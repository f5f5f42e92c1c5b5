//! Convergence detection for adaptive trial sequences.
//!
//! A turning point is a reversal in the direction of the adjusted variable.
//! Flat steps carry the previous direction forward, so `[1, 2, 2, 1]` holds a
//! single reversal, detected at index 3.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopRule {
    #[default]
    DontStop,
    Turnpoints,
    TurnpointsAtMinimum,
    StopkeyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurningPoint {
    /// Index of the level whose delta reversed the direction.
    pub detected_at: usize,
    /// Index of the peak or trough itself.
    pub extremum_at: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

fn direction(from: f64, to: f64) -> Option<Direction> {
    let delta = to - from;
    if delta > 0.0 {
        Some(Direction::Up)
    } else if delta < 0.0 {
        Some(Direction::Down)
    } else {
        None
    }
}

pub fn turning_points(levels: &[f64]) -> Vec<TurningPoint> {
    let mut points = Vec::new();
    let mut last = None;
    for (i, pair) in levels.windows(2).enumerate() {
        let Some(dir) = direction(pair[0], pair[1]) else {
            continue;
        };
        let at = i + 1;
        if last.is_some_and(|prev| prev != dir) {
            points.push(TurningPoint {
                detected_at: at,
                extremum_at: at - 1,
            });
        }
        last = Some(dir);
    }
    points
}

/// The turning point at which `target` reversals have been seen.
///
/// A zero target never stops.
pub fn stop_point(levels: &[f64], target: usize) -> Option<TurningPoint> {
    if target == 0 {
        return None;
    }
    turning_points(levels).get(target - 1).copied()
}

pub fn should_stop(levels: &[f64], target: usize) -> bool {
    stop_point(levels, target).is_some()
}

/// Adaptive settings of one block: which parameters to watch and when to stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSpec {
    /// Parameter holding the adjusted level.
    pub variable: String,
    /// Parameter holding the current step size.
    pub step: Option<String>,
    /// Boolean parameter set when the subject pressed the stop key.
    pub stop_key: Option<String>,
    pub rule: StopRule,
    pub target: u32,
    pub min_step: f64,
}

impl AdaptiveSpec {
    pub fn new(variable: &str, rule: StopRule, target: u32) -> Self {
        Self {
            variable: variable.to_owned(),
            step: None,
            stop_key: None,
            rule,
            target,
            min_step: 0.0,
        }
    }

    pub fn with_step(mut self, param: &str, min_step: f64) -> Self {
        self.step = Some(param.to_owned());
        self.min_step = min_step;
        self
    }

    pub fn with_stop_key(mut self, param: &str) -> Self {
        self.stop_key = Some(param.to_owned());
        self
    }

    pub fn evaluator(&self) -> AdaptiveEvaluator {
        AdaptiveEvaluator::new(self.rule, self.target, self.min_step)
    }
}

/// Per-sequence counterpart of [`turning_points`], fed one trial at a time.
#[derive(Debug, Clone)]
pub struct AdaptiveEvaluator {
    rule: StopRule,
    target: u32,
    min_step: f64,
    history: Vec<f64>,
    last_direction: Option<Direction>,
    turning_points: u32,
    turning_points_at_minimum: u32,
    current_step: f64,
    stopped: bool,
}

impl AdaptiveEvaluator {
    pub fn new(rule: StopRule, target: u32, min_step: f64) -> Self {
        Self {
            rule,
            target,
            min_step,
            history: Vec::new(),
            last_direction: None,
            turning_points: 0,
            turning_points_at_minimum: 0,
            current_step: 0.0,
            stopped: false,
        }
    }

    /// Records one trial and returns whether the sequence should stop now.
    pub fn observe(&mut self, level: f64, step: f64, stop_key_pressed: bool) -> bool {
        self.current_step = step;
        if let Some(&prev) = self.history.last() {
            if let Some(dir) = direction(prev, level) {
                if self.last_direction.is_some_and(|last| last != dir) {
                    self.turning_points += 1;
                    if self.at_minimum_step(step) {
                        self.turning_points_at_minimum += 1;
                    }
                    tracing::trace!(
                        "turning point {} at index {}",
                        self.turning_points,
                        self.history.len() - 1
                    );
                }
                self.last_direction = Some(dir);
            }
        }
        self.history.push(level);

        let fire = match self.rule {
            StopRule::DontStop => false,
            StopRule::Turnpoints => self.target > 0 && self.turning_points >= self.target,
            StopRule::TurnpointsAtMinimum => {
                self.target > 0 && self.turning_points_at_minimum >= self.target
            }
            StopRule::StopkeyResponse => stop_key_pressed,
        };
        if fire && !self.stopped {
            tracing::debug!(
                "adaptive stop after {} trials ({:?})",
                self.history.len(),
                self.rule
            );
        }
        self.stopped |= fire;
        fire
    }

    fn at_minimum_step(&self, step: f64) -> bool {
        (step.abs() - self.min_step.abs()).abs() <= f64::EPSILON * self.min_step.abs().max(1.0)
    }

    pub fn rule(&self) -> StopRule {
        self.rule
    }

    pub fn turning_points(&self) -> u32 {
        self.turning_points
    }

    pub fn turning_points_at_minimum(&self) -> u32 {
        self.turning_points_at_minimum
    }

    pub fn current_step(&self) -> f64 {
        self.current_step
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped
    }
}
