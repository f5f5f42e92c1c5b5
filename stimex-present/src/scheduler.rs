//! Frame scheduler: presents the timing groups of one stimulus at their
//! intended durations on a dedicated worker thread.
//!
//! The next group is rendered into the back buffer right after the current
//! one is shown, so only `present()` sits between the end of a wait and the
//! moment a group becomes visible.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;

use stimex_core::{
    Device, Display, ErrorSink, EventKind, EventSender, InputPoll, PresentationEvent,
    RuntimeConfig, RuntimeContext, ScreenId, Shared, StimulusId, TimerType, TimingElement,
};
use stimex_timing::{
    CalibrationStats, Clock, FrameTimes, MonotonicClock, WaitConfig, WaitLock, WaitOutcome, Waker,
};

use crate::error::{PresentError, Result};
use crate::vsync::{FixedRateSync, VerticalSync};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle = 0,
    Priming = 1,
    Running = 2,
    Advancing = 3,
    Finishing = 4,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerState::Priming,
            2 => SchedulerState::Running,
            3 => SchedulerState::Advancing,
            4 => SchedulerState::Finishing,
            _ => SchedulerState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub screen: ScreenId,
    pub wait: WaitConfig,
    pub record_presentations: bool,
}

impl SchedulerConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            screen: config.screen,
            wait: WaitConfig::from_millis(config.sleep_bound_ms, config.yield_bound_ms),
            record_presentations: config.record_presentations,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default())
    }
}

/// One presentation as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationRecord {
    pub group: usize,
    pub frame: u32,
    pub shown_at: u64,
}

/// What a finished session reports back to the control thread.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub stimulus: StimulusId,
    pub presentations: u64,
    /// Completed passes through `frames_per_cycle` frames.
    pub cycles: u64,
    pub start_time: Option<u64>,
    pub last_shown: Option<u64>,
    pub frame_stats: CalibrationStats,
    /// Filled only with `record_presentations`.
    pub records: Vec<PresentationRecord>,
}

/// Scheduler for one stimulus on one device. Consumed by [`FrameScheduler::start`].
pub struct FrameScheduler<D, V, S = FixedRateSync, C = MonotonicClock>
where
    D: Display,
    V: Device<Surface = D::Surface>,
    S: VerticalSync,
    C: Clock,
{
    stimulus: StimulusId,
    display: Shared<D>,
    device: Shared<V>,
    vsync: S,
    clock: C,
    input: Option<Box<dyn InputPoll>>,
    events: Option<EventSender>,
    errors: Arc<dyn ErrorSink>,
    config: SchedulerConfig,
}

impl<D, V> FrameScheduler<D, V>
where
    D: Display + 'static,
    V: Device<Surface = D::Surface> + 'static,
{
    /// Looks `stimulus` up in the runtime registry.
    pub fn new(ctx: &RuntimeContext<D>, stimulus: StimulusId, device: Shared<V>) -> Result<Self> {
        let display = ctx.display(stimulus)?;
        let config = ctx.config();
        Ok(Self {
            stimulus,
            display,
            device,
            vsync: FixedRateSync::new(config.refresh_period_nanos()),
            clock: MonotonicClock::new(),
            input: None,
            events: None,
            errors: ctx.error_sink(),
            config: SchedulerConfig::from_runtime(config),
        })
    }
}

impl<D, V, S, C> FrameScheduler<D, V, S, C>
where
    D: Display + 'static,
    V: Device<Surface = D::Surface> + 'static,
    S: VerticalSync + 'static,
    C: Clock,
{
    pub fn with_vsync<S2: VerticalSync>(self, vsync: S2) -> FrameScheduler<D, V, S2, C> {
        FrameScheduler {
            stimulus: self.stimulus,
            display: self.display,
            device: self.device,
            vsync,
            clock: self.clock,
            input: self.input,
            events: self.events,
            errors: self.errors,
            config: self.config,
        }
    }

    /// Presentation timestamps are taken from `clock`.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> FrameScheduler<D, V, S, C2> {
        FrameScheduler {
            stimulus: self.stimulus,
            display: self.display,
            device: self.device,
            vsync: self.vsync,
            clock,
            input: self.input,
            events: self.events,
            errors: self.errors,
            config: self.config,
        }
    }

    pub fn with_input(mut self, input: Box<dyn InputPoll>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the worker and starts presenting group 0 immediately.
    pub fn start(self) -> Result<SchedulerHandle> {
        let playing = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(SchedulerState::Idle as u8));
        let lock = WaitLock::new(self.clock, self.config.wait);
        let waker = lock.waker();
        let stimulus = self.stimulus;

        let session = Session {
            stimulus,
            display: self.display,
            device: self.device,
            vsync: self.vsync,
            lock,
            input: self.input,
            events: self.events,
            errors: self.errors,
            screen: self.config.screen,
            record: self.config.record_presentations,
            playing: Arc::clone(&playing),
            state: Arc::clone(&state),
            frame: 0,
            frame_increment: 1,
            frames_per_cycle: 1,
            group: 0,
            last_group: 0,
            timing: TimingElement::default(),
            shown_timer: TimerType::empty(),
            sync_to_vb: false,
            next_show: 0,
            start_time: None,
            last_shown: None,
            presentations: 0,
            cycles: 0,
            frame_times: FrameTimes::default(),
            records: Vec::new(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("frame-scheduler-{}", stimulus.0))
            .spawn(move || session.run())?;

        tracing::debug!("frame scheduler for {} started", stimulus);
        Ok(SchedulerHandle {
            stimulus,
            playing,
            state,
            waker,
            thread: Some(thread),
        })
    }
}

/// Control-thread side of a running session.
///
/// Dropping the handle stops the session and joins the worker.
pub struct SchedulerHandle {
    stimulus: StimulusId,
    playing: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    waker: Waker,
    thread: Option<JoinHandle<SessionSummary>>,
}

impl SchedulerHandle {
    pub fn stimulus(&self) -> StimulusId {
        self.stimulus
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancels the session. No frame is presented after the worker observes
    /// the cleared flag.
    pub fn stop(mut self) -> Result<SessionSummary> {
        self.cancel();
        self.join_worker()
    }

    /// Waits for the session to end on its own (END_OF_MEDIA).
    pub fn join(mut self) -> Result<SessionSummary> {
        self.join_worker()
    }

    fn cancel(&self) {
        self.playing.store(false, Ordering::Release);
        self.waker.wake();
    }

    fn join_worker(&mut self) -> Result<SessionSummary> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| PresentError::WorkerPanicked(self.stimulus.to_string()))?;
        thread
            .join()
            .map_err(|_| PresentError::WorkerPanicked(self.stimulus.to_string()))
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
            if self.join_worker().is_err() {
                tracing::error!("frame scheduler for {} panicked", self.stimulus);
            }
        }
    }
}

struct Session<D, V, S, C>
where
    D: Display,
    V: Device<Surface = D::Surface>,
    S: VerticalSync,
    C: Clock,
{
    stimulus: StimulusId,
    display: Shared<D>,
    device: Shared<V>,
    vsync: S,
    lock: WaitLock<C>,
    input: Option<Box<dyn InputPoll>>,
    events: Option<EventSender>,
    errors: Arc<dyn ErrorSink>,
    screen: ScreenId,
    record: bool,

    playing: Arc<AtomicBool>,
    state: Arc<AtomicU8>,

    frame: u32,
    frame_increment: u32,
    frames_per_cycle: u32,
    group: usize,
    last_group: usize,
    timing: TimingElement,
    /// Timer type of the group currently visible.
    shown_timer: TimerType,
    sync_to_vb: bool,
    next_show: u64,

    start_time: Option<u64>,
    last_shown: Option<u64>,
    presentations: u64,
    cycles: u64,
    frame_times: FrameTimes,
    records: Vec<PresentationRecord>,
}

impl<D, V, S, C> Session<D, V, S, C>
where
    D: Display,
    V: Device<Surface = D::Surface>,
    S: VerticalSync,
    C: Clock,
{
    fn run(mut self) -> SessionSummary {
        self.enter(SchedulerState::Priming);
        self.prime();
        self.enter(SchedulerState::Running);

        while self.playing() {
            if self.wait_next() == WaitOutcome::Woken || !self.playing() {
                break;
            }
            if self.sync_to_vb && self.vsync.wait_for_blank(&self.lock).is_none() {
                break;
            }
            if !self.playing() {
                break;
            }

            let shown_at = self.show();
            self.enter(SchedulerState::Advancing);
            self.advance(shown_at);
            if self.playing() {
                self.enter(SchedulerState::Running);
            }
        }

        self.enter(SchedulerState::Finishing);
        let summary = SessionSummary {
            stimulus: self.stimulus,
            presentations: self.presentations,
            cycles: self.cycles,
            start_time: self.start_time,
            last_shown: self.last_shown,
            frame_stats: self.frame_times.calibration_stats(),
            records: std::mem::take(&mut self.records),
        };
        tracing::info!(
            "frame scheduler for {} finished: {} presentations, {} cycles, {:.3} ms mean interval",
            self.stimulus,
            summary.presentations,
            summary.cycles,
            summary.frame_stats.average_frame_time_ns / 1_000_000.0
        );
        self.enter(SchedulerState::Idle);
        summary
    }

    fn playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn enter(&self, state: SchedulerState) {
        tracing::trace!("{}: {:?}", self.stimulus, state);
        self.state.store(state as u8, Ordering::Release);
    }

    fn prime(&mut self) {
        self.device.lock().select_screen(self.screen);
        {
            let mut display = self.display.lock();
            display.clear_active_group();
            display.compute_frame(0);
            self.frame_increment = display.frame_increment();
            self.frames_per_cycle = display.frames_per_cycle().max(1);
            self.last_group = display.last_group_index();
        }
        self.frame = 0;
        self.group = 0;
        self.prepare_group();
        self.next_show = 0;
    }

    /// Renders the current group into the back buffer and loads its timing.
    fn prepare_group(&mut self) {
        let mut display = self.display.lock();
        self.device
            .lock()
            .acquire_surface(|surface| display.render_active_group(surface, true));
        self.timing = display.timing_of(self.group);
        self.sync_to_vb = self.timing.timer_type.is_vsync();
    }

    fn wait_next(&mut self) -> WaitOutcome {
        let timer = self.shown_timer;
        let outcome = match self.input.as_mut() {
            Some(input) if timer.is_response_driven() => {
                self.lock.wait_for(self.next_show, || input.poll(timer))
            }
            _ => self.lock.wait_until(self.next_show),
        };
        if outcome == WaitOutcome::Polled {
            tracing::debug!("{}: group {} ended by response", self.stimulus, self.group);
        }
        outcome
    }

    fn show(&mut self) -> u64 {
        if let Err(e) = self.device.lock().present() {
            self.errors.report(&e);
        }
        let shown_at = self.lock.now();
        self.shown_timer = self.timing.timer_type;

        if self.start_time.is_none() {
            self.start_time = Some(shown_at);
        }
        if let Some(prev) = self.last_shown {
            self.frame_times
                .record_frame(std::time::Duration::from_nanos(shown_at.saturating_sub(prev)));
        }
        self.last_shown = Some(shown_at);
        self.presentations += 1;
        if self.record {
            self.records.push(PresentationRecord {
                group: self.group,
                frame: self.frame,
                shown_at,
            });
        }
        shown_at
    }

    fn advance(&mut self, shown_at: u64) {
        let duration = self.timing.duration_nanos().unwrap_or_else(|e| {
            self.errors.report(&e);
            0
        });
        self.next_show = shown_at.saturating_add(duration);

        if self.group >= self.last_group {
            {
                let mut display = self.display.lock();
                if display.is_adjustable() {
                    display.recompute_geometry();
                    display.recompute_timing();
                    display.recompute_colors();
                    self.last_group = display.last_group_index();
                }
            }

            self.frame = self.frame.saturating_add(self.frame_increment);
            if self.frame >= self.frames_per_cycle {
                self.frame = 0;
                self.cycles += 1;
                let timer = self.timing.timer_type;
                if timer.is_end_of_media() {
                    self.emit(EventKind::CloseMedia, shown_at);
                    self.playing.store(false, Ordering::Release);
                } else if timer.is_sync_to_media() {
                    self.emit(EventKind::SyncMedia, shown_at);
                }
            }

            if self.playing() {
                let mut display = self.display.lock();
                display.compute_frame(self.frame);
                display.clear_active_group();
                self.group = 0;
            }
        } else {
            self.group += 1;
            self.display.lock().advance_to_next_group();
        }

        if self.playing() {
            self.prepare_group();
        }
    }

    fn emit(&self, kind: EventKind, shown_at: u64) {
        let event = PresentationEvent {
            source: self.stimulus,
            kind,
            elapsed_nanos: shown_at - self.start_time.unwrap_or(shown_at),
            timestamp_nanos: shown_at,
        };
        tracing::debug!("{}: {:?} after {} ns", self.stimulus, kind, event.elapsed_nanos);
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                tracing::trace!("{}: event listener gone", self.stimulus);
            }
        }
    }
}
