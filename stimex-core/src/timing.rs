use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

bitflags! {
    /// How a timing group ends and what happens around it.
    ///
    /// Flags are independent and combine freely, e.g. `CLOCK | VIDEO_SYNC`
    /// for a clock-timed group whose presentation is gated on the vertical
    /// blank, or `KEY | DOWN | STORE_RESULT` for a response-terminated group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TimerType: u32 {
        const CLOCK = 1 << 0;
        const MOUSE_BUTTON = 1 << 1;
        const KEY = 1 << 2;
        const STOP_KEY = 1 << 3;
        const EXTERNAL_BUTTON = 1 << 4;
        const DOWN = 1 << 5;
        const UP = 1 << 6;
        const MOUSE_TRACKING = 1 << 7;
        const STORE_RESULT = 1 << 8;
        const START_RESPONSE_TIMER = 1 << 9;
        const STOP_RESPONSE_TIMER = 1 << 10;
        const VIDEO_SYNC = 1 << 11;
        const WATCH_SPURIOUS = 1 << 12;
        const SERIAL_LINE = 1 << 13;
        const VOICE_KEY = 1 << 14;
        const SYNC_TO_MEDIA = 1 << 15;
        const END_OF_MEDIA = 1 << 16;
        const AXIS_TRACKING = 1 << 17;
        const WHEEL_TRACKING = 1 << 18;
        const FIXED_DELAY = 1 << 19;

        /// Every source that can end a group before its clock runs out.
        const RESPONSE = Self::MOUSE_BUTTON.bits()
            | Self::KEY.bits()
            | Self::STOP_KEY.bits()
            | Self::EXTERNAL_BUTTON.bits()
            | Self::SERIAL_LINE.bits()
            | Self::VOICE_KEY.bits();
    }
}

impl TimerType {
    pub fn is_clock(&self) -> bool {
        self.contains(Self::CLOCK)
    }

    pub fn is_vsync(&self) -> bool {
        self.contains(Self::VIDEO_SYNC)
    }

    pub fn is_end_of_media(&self) -> bool {
        self.contains(Self::END_OF_MEDIA)
    }

    pub fn is_sync_to_media(&self) -> bool {
        self.contains(Self::SYNC_TO_MEDIA)
    }

    pub fn is_fixed_delay(&self) -> bool {
        self.contains(Self::FIXED_DELAY)
    }

    pub fn is_response_driven(&self) -> bool {
        self.intersects(Self::RESPONSE)
    }

    pub fn stores_result(&self) -> bool {
        self.contains(Self::STORE_RESULT)
    }
}

/// Intended duration and timer type of one timing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimingElement {
    /// Nanoseconds. Signed because adjustable stimuli compute it at run time
    /// and may produce garbage.
    pub intended_duration: i64,
    pub timer_type: TimerType,
}

impl TimingElement {
    pub fn new(intended_duration: i64, timer_type: TimerType) -> Self {
        Self {
            intended_duration,
            timer_type,
        }
    }

    pub fn clock_millis(ms: u64) -> Self {
        Self::new((ms * 1_000_000) as i64, TimerType::CLOCK)
    }

    /// Duration in nanoseconds, rejecting negative values.
    pub fn duration_nanos(&self) -> Result<u64, CoreError> {
        u64::try_from(self.intended_duration)
            .map_err(|_| CoreError::NegativeDuration(self.intended_duration))
    }
}

/// Elements presented together for one timed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingGroup<E> {
    pub elements: Vec<E>,
    pub timing: TimingElement,
}

impl<E> TimingGroup<E> {
    pub fn new(elements: Vec<E>, timing: TimingElement) -> Self {
        Self { elements, timing }
    }
}

/// Ordered timing groups of one stimulus with a presentation cursor.
///
/// `last` is the group that closes a cycle. It normally equals
/// `groups.len() - 1` but adjustable stimuli may shorten the cycle at run
/// time through [`GroupList::set_last_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupList<E> {
    groups: Vec<TimingGroup<E>>,
    cursor: usize,
    last: usize,
}

impl<E> GroupList<E> {
    pub fn new(groups: Vec<TimingGroup<E>>) -> Self {
        let last = groups.len().saturating_sub(1);
        Self {
            groups,
            cursor: 0,
            last,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    /// Moves to the next group. The cursor never passes the last group.
    pub fn advance(&mut self) {
        if self.cursor < self.last {
            self.cursor += 1;
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn active(&self) -> Option<&TimingGroup<E>> {
        self.groups.get(self.cursor)
    }

    pub fn get(&self, index: usize) -> Option<&TimingGroup<E>> {
        self.groups.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TimingGroup<E>> {
        self.groups.get_mut(index)
    }

    /// Timing of `index`, or a zero-length clock group when out of range.
    pub fn timing_of(&self, index: usize) -> TimingElement {
        self.groups
            .get(index)
            .map(|g| g.timing)
            .unwrap_or_else(|| TimingElement::new(0, TimerType::CLOCK))
    }

    pub fn last_index(&self) -> usize {
        self.last
    }

    pub fn set_last_index(&mut self, last: usize) {
        self.last = last.min(self.groups.len().saturating_sub(1));
        if self.cursor > self.last {
            self.cursor = self.last;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingGroup<E>> {
        self.groups.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TimingGroup<E>> {
        self.groups.iter_mut()
    }
}
