pub mod delayed;
pub mod error;
pub mod pixmap;
pub mod scheduler;
pub mod stimulus;
pub mod vsync;

pub use delayed::{DelayedHandle, DelayedPresentation};
pub use error::{PresentError, Result};
pub use pixmap::PixmapDevice;
pub use scheduler::{
    FrameScheduler, PresentationRecord, SchedulerConfig, SchedulerHandle, SchedulerState,
    SessionSummary,
};
pub use stimulus::{ArrowDirection, Element, HookCalls, Shape, ShapeStimulus};
pub use vsync::{FixedRateSync, VerticalSync};
