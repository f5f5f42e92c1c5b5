use std::sync::Arc;
use std::time::{Duration, Instant};

use stimex_core::{
    CoreError, Device, EventKind, InputPoll, RecordingSink, RuntimeConfig, RuntimeContext, Shared,
    StimulusId, TimerType, TimingElement, TimingGroup, event_channel, shared,
};
use stimex_present::{
    DelayedPresentation, Element, FixedRateSync, FrameScheduler, PixmapDevice, PresentError, Shape,
    ShapeStimulus,
};
use stimex_timing::{Clock, MonotonicClock};
use tiny_skia::Color;

const MS: i64 = 1_000_000;
const RECV: Duration = Duration::from_secs(5);

fn context() -> (RuntimeContext<ShapeStimulus>, Arc<RecordingSink>) {
    let config = RuntimeConfig {
        record_presentations: true,
        sleep_bound_ms: 2,
        yield_bound_ms: 1,
        ..RuntimeConfig::default()
    };
    let sink = Arc::new(RecordingSink::new());
    let ctx = RuntimeContext::new(config).with_error_sink(sink.clone());
    (ctx, sink)
}

fn device() -> Shared<PixmapDevice> {
    shared(PixmapDevice::new(16, 16).unwrap())
}

fn square(color: [u8; 4]) -> Element {
    Element::new(
        Shape::Rectangle {
            width: 6.0,
            height: 6.0,
            color,
        },
        (8.0, 8.0),
    )
}

fn group(nanos: i64, timer: TimerType) -> TimingGroup<Element> {
    TimingGroup::new(vec![square([255, 255, 255, 255])], TimingElement::new(nanos, timer))
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < RECV, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn frame_counter_wraps_at_frames_per_cycle() {
    let (mut ctx, _) = context();
    let id = StimulusId(1);
    ctx.register(
        ShapeStimulus::new(id, vec![group(MS, TimerType::CLOCK | TimerType::SYNC_TO_MEDIA)])
            .with_frames(4, 1),
    );
    let (tx, rx) = event_channel();
    let handle = FrameScheduler::new(&ctx, id, device())
        .unwrap()
        .with_events(tx)
        .start()
        .unwrap();

    for _ in 0..4 {
        let event = rx.recv_timeout(RECV).unwrap();
        assert_eq!(event.kind, EventKind::SyncMedia);
        assert_eq!(event.source, id);
    }
    let summary = handle.stop().unwrap();

    assert!(summary.records.len() >= 16);
    let frames: Vec<u32> = summary.records.iter().take(16).map(|r| r.frame).collect();
    assert_eq!(frames, [0u32, 1, 2, 3].repeat(4));
    assert!(summary.records.iter().all(|r| r.group == 0));
    assert!(summary.records.windows(2).all(|w| w[1].shown_at > w[0].shown_at));
    assert!(summary.cycles >= 4);
}

#[test]
fn end_of_media_closes_after_one_cycle() {
    let (mut ctx, sink) = context();
    let id = StimulusId(2);
    ctx.register(ShapeStimulus::new(
        id,
        vec![
            group(MS, TimerType::CLOCK),
            group(MS, TimerType::CLOCK),
            group(MS, TimerType::CLOCK | TimerType::END_OF_MEDIA),
        ],
    ));
    let dev = device();
    let (tx, rx) = event_channel();
    let handle = FrameScheduler::new(&ctx, id, dev.clone())
        .unwrap()
        .with_events(tx)
        .start()
        .unwrap();

    let event = rx.recv_timeout(RECV).unwrap();
    assert_eq!(event.kind, EventKind::CloseMedia);
    assert!(event.elapsed_nanos >= 2 * MS as u64);

    let summary = handle.join().unwrap();
    assert_eq!(summary.presentations, 3);
    assert_eq!(summary.cycles, 1);
    let groups: Vec<usize> = summary.records.iter().map(|r| r.group).collect();
    assert_eq!(groups, vec![0, 1, 2]);
    assert_eq!(summary.last_shown, Some(event.timestamp_nanos));

    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(dev.lock().presents(), 3);
    assert!(rx.try_recv().is_err());
    assert!(sink.is_empty());
}

#[test]
fn stop_cancels_a_long_wait() {
    let (mut ctx, _) = context();
    let id = StimulusId(3);
    ctx.register(ShapeStimulus::single(
        id,
        vec![square([255, 0, 0, 255])],
        TimingElement::new(10_000 * MS, TimerType::CLOCK),
    ));
    let dev = device();
    let handle = FrameScheduler::new(&ctx, id, dev.clone()).unwrap().start().unwrap();
    wait_for(|| dev.lock().presents() == 1);

    let start = Instant::now();
    let summary = handle.stop().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.presentations, 1);
    assert_eq!(dev.lock().presents(), 1);
    assert_eq!(dev.lock().visible_pixel(8, 8).unwrap().red(), 255);
}

#[test]
fn negative_duration_is_reported_and_skipped() {
    let (mut ctx, sink) = context();
    let id = StimulusId(4);
    ctx.register(ShapeStimulus::new(
        id,
        vec![
            group(-5 * MS, TimerType::CLOCK),
            group(MS, TimerType::CLOCK | TimerType::END_OF_MEDIA),
        ],
    ));
    let handle = FrameScheduler::new(&ctx, id, device()).unwrap().start().unwrap();
    let summary = handle.join().unwrap();

    assert_eq!(summary.presentations, 2);
    assert_eq!(sink.len(), 1);
    assert!(sink.messages()[0].contains("negative"));
}

#[test]
fn adjustable_stimulus_recomputes_at_cycle_boundary() {
    let (mut ctx, _) = context();
    let id = StimulusId(5);
    let timer = TimerType::CLOCK | TimerType::SYNC_TO_MEDIA;
    let mut stimulus =
        ShapeStimulus::new(id, vec![group(MS, timer), group(MS, timer), group(MS, timer)])
            .adjustable(true);
    stimulus.schedule_last_group(0);
    let display = ctx.register(stimulus);

    let (tx, rx) = event_channel();
    let handle = FrameScheduler::new(&ctx, id, device())
        .unwrap()
        .with_events(tx)
        .start()
        .unwrap();
    for _ in 0..3 {
        rx.recv_timeout(RECV).unwrap();
    }
    let summary = handle.stop().unwrap();

    let groups: Vec<usize> = summary.records.iter().take(5).map(|r| r.group).collect();
    assert_eq!(groups, vec![0, 1, 2, 0, 0]);
    assert!(display.lock().hooks().recompute >= 3);
}

#[test]
fn video_sync_gates_presentations() {
    let (mut ctx, _) = context();
    let id = StimulusId(6);
    ctx.register(ShapeStimulus::single(
        id,
        vec![square([0, 255, 0, 255])],
        TimingElement::new(MS, TimerType::CLOCK | TimerType::VIDEO_SYNC),
    ));
    let clock = MonotonicClock::new();
    let handle = FrameScheduler::new(&ctx, id, device())
        .unwrap()
        .with_clock(clock)
        .with_vsync(FixedRateSync::new(4 * MS as u64))
        .start()
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let summary = handle.stop().unwrap();

    // Without the vertical blank gate a 1 ms group would show ~50 times.
    assert!(summary.presentations >= 1);
    assert!(summary.presentations <= 15, "{} presentations", summary.presentations);
    assert!(
        summary
            .records
            .windows(2)
            .all(|w| w[1].shown_at - w[0].shown_at >= 2 * MS as u64)
    );
}

struct CountingPoll {
    calls: u32,
    hit_at: u32,
}

impl InputPoll for CountingPoll {
    fn poll(&mut self, timer: TimerType) -> bool {
        assert!(timer.is_response_driven());
        self.calls += 1;
        self.calls >= self.hit_at
    }
}

#[test]
fn response_ends_a_group_early() {
    let (mut ctx, _) = context();
    let id = StimulusId(7);
    ctx.register(ShapeStimulus::new(
        id,
        vec![
            group(10_000 * MS, TimerType::KEY | TimerType::DOWN),
            group(MS, TimerType::CLOCK | TimerType::END_OF_MEDIA),
        ],
    ));
    let (tx, rx) = event_channel();
    let start = Instant::now();
    let handle = FrameScheduler::new(&ctx, id, device())
        .unwrap()
        .with_input(Box::new(CountingPoll {
            calls: 0,
            hit_at: 20,
        }))
        .with_events(tx)
        .start()
        .unwrap();

    assert_eq!(rx.recv_timeout(RECV).unwrap().kind, EventKind::CloseMedia);
    let summary = handle.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.presentations, 2);
}

#[test]
fn unknown_stimulus_is_an_error() {
    let (ctx, _) = context();
    let err = FrameScheduler::new(&ctx, StimulusId(99), device()).err().unwrap();
    assert!(matches!(
        err,
        PresentError::Core(CoreError::UnknownStimulus(StimulusId(99)))
    ));
}

fn white_screen() -> Shared<PixmapDevice> {
    let dev = device();
    {
        let mut d = dev.lock();
        d.acquire_surface(|pm| pm.fill(Color::WHITE));
        d.present().unwrap();
    }
    dev
}

#[test]
fn delayed_presentation_overlays_after_deadline() {
    let (mut ctx, _) = context();
    let id = StimulusId(8);
    ctx.register(ShapeStimulus::single(
        id,
        vec![square([0, 0, 255, 255])],
        TimingElement::clock_millis(1),
    ));
    let dev = white_screen();
    let clock = MonotonicClock::new();
    let show_at = clock.now() + 5 * MS as u64;

    let shown = DelayedPresentation::new(&ctx, id, dev.clone(), show_at)
        .unwrap()
        .with_clock(clock)
        .spawn()
        .unwrap()
        .join()
        .unwrap()
        .unwrap();

    assert!(shown >= show_at);
    let d = dev.lock();
    assert_eq!(d.presents(), 2);
    assert_eq!(d.visible_pixel(0, 0).unwrap().red(), 255);
    assert_eq!(d.visible_pixel(8, 8).unwrap().blue(), 255);
    assert_eq!(d.visible_pixel(8, 8).unwrap().red(), 0);
}

#[test]
fn delayed_presentation_respects_execute_flag() {
    let (mut ctx, _) = context();
    let id = StimulusId(9);
    let display = ctx.register(ShapeStimulus::single(
        id,
        vec![square([0, 0, 255, 255])],
        TimingElement::clock_millis(1),
    ));
    display.lock().set_execute(false);
    let dev = white_screen();
    let clock = MonotonicClock::new();

    let shown = DelayedPresentation::new(&ctx, id, dev.clone(), clock.now() + MS as u64)
        .unwrap()
        .with_clock(clock)
        .spawn()
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(shown, None);
    assert_eq!(dev.lock().presents(), 1);
}

#[test]
fn delayed_presentation_can_be_cancelled() {
    let (mut ctx, _) = context();
    let id = StimulusId(10);
    ctx.register(ShapeStimulus::single(
        id,
        vec![square([0, 0, 255, 255])],
        TimingElement::clock_millis(1),
    ));
    let dev = white_screen();
    let clock = MonotonicClock::new();
    let handle = DelayedPresentation::new(&ctx, id, dev.clone(), clock.now() + 60_000 * MS as u64)
        .unwrap()
        .with_clock(clock)
        .spawn()
        .unwrap();
    assert_eq!(handle.cancel().unwrap(), None);
    assert_eq!(dev.lock().presents(), 1);
}
