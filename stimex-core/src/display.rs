use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::timing::{TimerType, TimingElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StimulusId(pub u32);

impl fmt::Display for StimulusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ScreenId(pub u32);

/// The narrow capability set the schedulers need from a stimulus.
///
/// A stimulus owns an ordered list of timing groups and a cursor into it.
/// Everything about how the elements of a group are drawn stays behind
/// [`Display::render_active_group`].
pub trait Display: Send {
    type Surface: ?Sized;

    fn id(&self) -> StimulusId;

    /// Recompute frame-dependent content (animation position, media frame).
    fn compute_frame(&mut self, frame: u32);

    /// Reset the group cursor to the first group.
    fn clear_active_group(&mut self);

    fn advance_to_next_group(&mut self);

    fn active_group(&self) -> usize;

    /// Draw the active group. With `clear_background == false` the group is
    /// drawn over whatever the surface already shows.
    fn render_active_group(&mut self, surface: &mut Self::Surface, clear_background: bool);

    fn timing_of(&self, group: usize) -> TimingElement;

    fn last_group_index(&self) -> usize;

    fn frame_increment(&self) -> u32 {
        1
    }

    fn frames_per_cycle(&self) -> u32 {
        1
    }

    /// Adjustable stimuli get their recompute hooks called at every cycle
    /// boundary.
    fn is_adjustable(&self) -> bool {
        false
    }

    fn recompute_geometry(&mut self) {}

    fn recompute_timing(&mut self) {}

    fn recompute_colors(&mut self) {}

    fn execute_flag(&self) -> bool {
        true
    }
}

/// Output device with a back buffer.
pub trait Device: Send {
    type Surface: ?Sized;

    fn select_screen(&mut self, screen: ScreenId);

    /// Lends the back buffer to `render`. The surface is released when the
    /// closure returns.
    fn acquire_surface<R>(&mut self, render: impl FnOnce(&mut Self::Surface) -> R) -> R;

    /// Make the back buffer visible.
    fn present(&mut self) -> Result<()>;
}

/// Input source polled while a response-driven timing group is waiting.
pub trait InputPoll: Send {
    /// Returns true once a response matching `timer` has arrived.
    fn poll(&mut self, timer: TimerType) -> bool;
}

pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
