use serde::{Deserialize, Serialize};

use crate::display::StimulusId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The stimulus completed its END_OF_MEDIA cycle and stopped itself.
    CloseMedia,
    /// A SYNC_TO_MEDIA stimulus wrapped its cycle and keeps running.
    SyncMedia,
}

/// Completion event sent by a scheduler session to its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationEvent {
    pub source: StimulusId,
    pub kind: EventKind,
    /// Time from the first presentation of the session to this one.
    pub elapsed_nanos: u64,
    pub timestamp_nanos: u64,
}

pub type EventSender = crossbeam_channel::Sender<PresentationEvent>;
pub type EventReceiver = crossbeam_channel::Receiver<PresentationEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
