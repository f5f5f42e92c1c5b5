use std::sync::Arc;
use std::thread::JoinHandle;

use stimex_core::{Device, Display, ErrorSink, RuntimeContext, ScreenId, Shared, StimulusId};
use stimex_timing::{Clock, MonotonicClock, WaitConfig, WaitLock, WaitOutcome, Waker};

use crate::error::{PresentError, Result};

/// Shows the current group of a stimulus once, at an absolute deadline, over
/// whatever the device currently displays.
pub struct DelayedPresentation<D, V, C = MonotonicClock>
where
    D: Display,
    V: Device<Surface = D::Surface>,
    C: Clock,
{
    stimulus: StimulusId,
    display: Shared<D>,
    device: Shared<V>,
    clock: C,
    wait: WaitConfig,
    screen: ScreenId,
    errors: Arc<dyn ErrorSink>,
    show_at: u64,
}

impl<D, V> DelayedPresentation<D, V>
where
    D: Display + 'static,
    V: Device<Surface = D::Surface> + 'static,
{
    pub fn new(
        ctx: &RuntimeContext<D>,
        stimulus: StimulusId,
        device: Shared<V>,
        show_at: u64,
    ) -> Result<Self> {
        let config = ctx.config();
        Ok(Self {
            stimulus,
            display: ctx.display(stimulus)?,
            device,
            clock: MonotonicClock::new(),
            wait: WaitConfig::from_millis(config.sleep_bound_ms, config.yield_bound_ms),
            screen: config.screen,
            errors: ctx.error_sink(),
            show_at,
        })
    }
}

impl<D, V, C> DelayedPresentation<D, V, C>
where
    D: Display + 'static,
    V: Device<Surface = D::Surface> + 'static,
    C: Clock,
{
    /// `show_at` is read on `clock`.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> DelayedPresentation<D, V, C2> {
        DelayedPresentation {
            stimulus: self.stimulus,
            display: self.display,
            device: self.device,
            clock,
            wait: self.wait,
            screen: self.screen,
            errors: self.errors,
            show_at: self.show_at,
        }
    }

    pub fn spawn(self) -> Result<DelayedHandle> {
        let lock = WaitLock::new(self.clock.clone(), self.wait);
        let waker = lock.waker();
        let stimulus = self.stimulus;
        let thread = std::thread::Builder::new()
            .name(format!("delayed-presentation-{}", stimulus.0))
            .spawn(move || self.run(lock))?;
        Ok(DelayedHandle {
            stimulus,
            waker,
            thread,
        })
    }

    fn run(self, lock: WaitLock<C>) -> Option<u64> {
        if lock.wait_until(self.show_at) != WaitOutcome::Reached {
            tracing::debug!("delayed presentation of {} cancelled", self.stimulus);
            return None;
        }

        let mut display = self.display.lock();
        if !display.execute_flag() {
            tracing::debug!("delayed presentation of {} skipped", self.stimulus);
            return None;
        }
        let mut device = self.device.lock();
        device.select_screen(self.screen);
        device.acquire_surface(|surface| display.render_active_group(surface, false));
        if let Err(e) = device.present() {
            self.errors.report(&e);
        }
        let shown_at = lock.now();
        tracing::debug!(
            "delayed presentation of {} shown {} ns after deadline",
            self.stimulus,
            shown_at.saturating_sub(self.show_at)
        );
        Some(shown_at)
    }
}

pub struct DelayedHandle {
    stimulus: StimulusId,
    waker: Waker,
    thread: JoinHandle<Option<u64>>,
}

impl DelayedHandle {
    pub fn stimulus(&self) -> StimulusId {
        self.stimulus
    }

    /// Presentation time, or `None` if nothing was shown.
    pub fn join(self) -> Result<Option<u64>> {
        self.thread
            .join()
            .map_err(|_| PresentError::WorkerPanicked(self.stimulus.to_string()))
    }

    /// Aborts a pending wait. A presentation already under way completes.
    pub fn cancel(self) -> Result<Option<u64>> {
        self.waker.wake();
        self.join()
    }
}
