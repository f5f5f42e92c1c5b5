use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use stimex_core::{
    CoreError, Display, InputPoll, RuntimeContext, Shared, StimulusId, TimerType, TimingElement,
    TimingGroup, UnitState, event_channel,
};
use stimex_present::{
    ArrowDirection, DelayedPresentation, Element, FrameScheduler, PixmapDevice, PresentError,
    SessionSummary, Shape, ShapeStimulus,
};
use stimex_procedure::{ListKind, ParamValue, ParameterTable, Unit, UnitExecutor, UnitKind};
use stimex_timing::{Clock, MonotonicClock};

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;
const CENTER: (f32, f32) = (WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);

const WHITE: [u8; 4] = [255, 255, 255, 255];
const GREEN: [u8; 4] = [0, 200, 0, 255];
const RED: [u8; 4] = [220, 0, 0, 255];
const GRAY: [u8; 4] = [48, 48, 48, 255];

/// Durations of the phases of one arrow trial.
#[derive(Debug, Clone)]
struct TrialTiming {
    fixation_range_ms: (u64, u64),
    stimulus_ms: u64,
    response_window_ms: u64,
    feedback_delay_ms: u64,
    banner_ms: u64,
}

impl Default for TrialTiming {
    fn default() -> Self {
        Self {
            fixation_range_ms: (30, 60),
            stimulus_ms: 50,
            response_window_ms: 150,
            feedback_delay_ms: 20,
            banner_ms: 30,
        }
    }
}

fn millis(ms: u64) -> i64 {
    ms as i64 * 1_000_000
}

/// Blank group that ends the stimulus once every group before it has had
/// its full duration.
fn closing_group() -> TimingGroup<Element> {
    TimingGroup::new(
        Vec::new(),
        TimingElement::new(0, TimerType::CLOCK | TimerType::END_OF_MEDIA),
    )
}

/// Simulated subject: answers a fixed time after the response window opens,
/// or never.
struct SimulatedSubject {
    respond_after: Option<Duration>,
    window_opened: Option<Instant>,
    response: Arc<Mutex<Option<Duration>>>,
}

impl InputPoll for SimulatedSubject {
    fn poll(&mut self, _timer: TimerType) -> bool {
        let Some(after) = self.respond_after else {
            return false;
        };
        let opened = *self.window_opened.get_or_insert_with(Instant::now);
        let elapsed = opened.elapsed();
        if elapsed < after {
            return false;
        }
        *self.response.lock() = Some(elapsed);
        true
    }
}

/// Runs arrow trials on the software device.
pub struct DemoExecutor<R: Rng> {
    device: Shared<PixmapDevice>,
    clock: MonotonicClock,
    rng: R,
    timing: TrialTiming,
    next_id: u32,
}

impl<R: Rng> DemoExecutor<R> {
    pub fn new(device: Shared<PixmapDevice>, rng: R) -> Self {
        Self {
            device,
            clock: MonotonicClock::new(),
            rng,
            timing: TrialTiming::default(),
            next_id: 1,
        }
    }

    fn next_stimulus_id(&mut self) -> StimulusId {
        let id = StimulusId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Presents `stimulus` until it closes itself and returns the session summary.
    fn play(
        &mut self,
        ctx: &mut RuntimeContext<ShapeStimulus>,
        stimulus: ShapeStimulus,
        input: Option<Box<dyn InputPoll>>,
    ) -> Result<SessionSummary, PresentError> {
        let id = stimulus.id();
        ctx.register(stimulus);
        let (tx, rx) = event_channel();
        let mut scheduler = FrameScheduler::new(ctx, id, self.device.clone())?.with_events(tx);
        if let Some(input) = input {
            scheduler = scheduler.with_input(input);
        }
        let handle = scheduler.start()?;

        match rx.recv() {
            Ok(event) => tracing::trace!(
                "{} closed after {:.1} ms",
                event.source,
                event.elapsed_nanos as f64 / 1e6
            ),
            Err(crossbeam_channel::RecvError) => {
                tracing::warn!("{} ended without a completion event", id)
            }
        }
        let summary = handle.join();
        ctx.remove(id);
        summary
    }

    fn show_banner(&mut self, unit: &Unit, ctx: &mut RuntimeContext<ShapeStimulus>) -> UnitState {
        let id = self.next_stimulus_id();
        let banner = ShapeStimulus::new(
            id,
            vec![
                TimingGroup::new(
                    vec![Element::new(
                        Shape::Rectangle {
                            width: 400.0,
                            height: 40.0,
                            color: WHITE,
                        },
                        CENTER,
                    )],
                    TimingElement::clock_millis(self.timing.banner_ms),
                ),
                closing_group(),
            ],
        )
        .with_background(GRAY);
        match self.play(ctx, banner, None) {
            Ok(_) => {
                tracing::info!("block `{}` started", unit.name());
                UnitState::Execute
            }
            Err(e) => {
                ctx.report(&CoreError::Device(e.to_string()));
                UnitState::Error
            }
        }
    }

    fn run_trial(
        &mut self,
        unit: &Unit,
        params: &mut ParameterTable,
        ctx: &mut RuntimeContext<ShapeStimulus>,
    ) -> UnitState {
        match self.present_trial(unit, params, ctx) {
            Ok(state) => state,
            Err(e) => {
                ctx.report(&CoreError::Device(format!("trial `{}`: {}", unit.name(), e)));
                UnitState::Error
            }
        }
    }

    fn present_trial(
        &mut self,
        unit: &Unit,
        params: &mut ParameterTable,
        ctx: &mut RuntimeContext<ShapeStimulus>,
    ) -> Result<UnitState, PresentError> {
        let direction = match params.get("direction").and_then(ParamValue::as_text) {
            Some("left") => ArrowDirection::Left,
            _ => ArrowDirection::Right,
        };
        let level = params.get_f64("level");
        let (lo, hi) = self.timing.fixation_range_ms;
        let fixation_ms = self.rng.random_range(lo..=hi);

        let id = self.next_stimulus_id();
        let sync = TimerType::CLOCK | TimerType::VIDEO_SYNC;
        let stimulus = ShapeStimulus::new(
            id,
            vec![
                TimingGroup::new(fixation_cross(), TimingElement::new(millis(fixation_ms), sync)),
                TimingGroup::new(
                    vec![arrow(direction, level)],
                    TimingElement::new(
                        millis(self.timing.stimulus_ms),
                        sync | TimerType::START_RESPONSE_TIMER,
                    ),
                ),
                TimingGroup::new(
                    Vec::new(),
                    TimingElement::new(
                        millis(self.timing.response_window_ms),
                        TimerType::KEY
                            | TimerType::DOWN
                            | TimerType::STORE_RESULT
                            | TimerType::STOP_RESPONSE_TIMER,
                    ),
                ),
                closing_group(),
            ],
        );

        // Harder to see at low contrast.
        let p_correct = level.map_or(0.9, |l| (0.5 + l / 20.0).clamp(0.5, 0.98));
        let responds = self.rng.random_bool(0.95);
        let correct = responds && self.rng.random_bool(p_correct);
        let response = Arc::new(Mutex::new(None));
        let subject = SimulatedSubject {
            respond_after: responds.then(|| Duration::from_millis(self.rng.random_range(40..=110))),
            window_opened: None,
            response: Arc::clone(&response),
        };

        let summary = self.play(ctx, stimulus, Some(Box::new(subject)))?;
        let rt = *response.lock();
        tracing::debug!(
            "trial `{}`: {} presentations, rt {:?}, correct {}",
            unit.name(),
            summary.presentations,
            rt,
            correct
        );

        params.set("rt_ms", rt.map_or(-1.0, |d| d.as_secs_f64() * 1e3));
        params.set("correct", correct);
        if let (Some(level), Some(step)) = (level, params.get_f64("step")) {
            let next = if correct { level - step } else { level + step };
            params.set("level", next.max(0.0));
        }

        self.feedback(ctx, correct)?;

        if rt.is_none() && params.get_bool("repeat_misses") == Some(true) {
            tracing::info!("trial `{}` missed, repeating", unit.name());
            return Ok(UnitState::Repeat);
        }
        Ok(UnitState::Execute)
    }

    /// Overlays a colored dot on the last frame shortly after the trial.
    fn feedback(
        &mut self,
        ctx: &mut RuntimeContext<ShapeStimulus>,
        correct: bool,
    ) -> Result<(), PresentError> {
        let id = self.next_stimulus_id();
        let color = if correct { GREEN } else { RED };
        ctx.register(ShapeStimulus::single(
            id,
            vec![Element::new(
                Shape::Circle {
                    radius: 12.0,
                    color,
                },
                CENTER,
            )],
            TimingElement::clock_millis(0),
        ));
        let show_at = self.clock.now() + millis(self.timing.feedback_delay_ms) as u64;
        let shown = DelayedPresentation::new(ctx, id, self.device.clone(), show_at)?
            .with_clock(self.clock)
            .spawn()?
            .join();
        ctx.remove(id);
        if shown?.is_none() {
            tracing::warn!("feedback {} was not shown", id);
        }
        Ok(())
    }
}

fn fixation_cross() -> Vec<Element> {
    let bar = |width, height| {
        Element::new(
            Shape::Rectangle {
                width,
                height,
                color: WHITE,
            },
            CENTER,
        )
    };
    vec![bar(30.0, 4.0), bar(4.0, 30.0)]
}

fn arrow(direction: ArrowDirection, level: Option<f64>) -> Element {
    let shade = level.map_or(255, |l| (l / 10.0 * 255.0).clamp(16.0, 255.0) as u8);
    Element::new(
        Shape::Arrow {
            direction,
            size: 60.0,
            color: [shade, shade, shade, 255],
        },
        CENTER,
    )
}

impl<R: Rng> UnitExecutor for DemoExecutor<R> {
    type Display = ShapeStimulus;

    fn run_list(
        &mut self,
        unit: &Unit,
        list: ListKind,
        params: &mut ParameterTable,
        ctx: &mut RuntimeContext<ShapeStimulus>,
    ) -> UnitState {
        match (unit.kind(), list) {
            (UnitKind::Trial, ListKind::Main) => self.run_trial(unit, params, ctx),
            (UnitKind::Block, ListKind::Start) => self.show_banner(unit, ctx),
            _ => UnitState::Execute,
        }
    }
}
