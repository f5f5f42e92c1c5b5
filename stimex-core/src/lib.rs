pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod event;
pub mod state;
pub mod timing;

pub use config::RuntimeConfig;
pub use context::RuntimeContext;
pub use display::{Device, Display, InputPoll, ScreenId, Shared, StimulusId, shared};
pub use error::{CoreError, ErrorSink, LogSink, RecordingSink, Result};
pub use event::{EventKind, EventReceiver, EventSender, PresentationEvent, event_channel};
pub use state::UnitState;
pub use timing::{GroupList, TimerType, TimingElement, TimingGroup};
