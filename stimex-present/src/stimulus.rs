use stimex_core::{Display, GroupList, StimulusId, TimingElement, TimingGroup};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrowDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle {
        radius: f32,
        color: [u8; 4],
    },
    Rectangle {
        width: f32,
        height: f32,
        color: [u8; 4],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        color: [u8; 4],
    },
}

/// A shape placed by its center.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub shape: Shape,
    pub center: (f32, f32),
}

impl Element {
    pub fn new(shape: Shape, center: (f32, f32)) -> Self {
        Self { shape, center }
    }
}

/// Counts of the hooks the schedulers called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookCalls {
    pub compute_frame: u64,
    pub recompute: u64,
    pub renders: u64,
}

/// Reference stimulus made of flat shapes.
///
/// Every frame of a cycle shifts all elements by `motion`; an adjustable
/// stimulus can shorten its cycle at the next boundary via
/// [`ShapeStimulus::schedule_last_group`].
#[derive(Debug, Clone)]
pub struct ShapeStimulus {
    id: StimulusId,
    groups: GroupList<Element>,
    background: [u8; 4],
    frame_increment: u32,
    frames_per_cycle: u32,
    motion: (f32, f32),
    offset: (f32, f32),
    adjustable: bool,
    pending_last: Option<usize>,
    execute: bool,
    hooks: HookCalls,
}

impl ShapeStimulus {
    pub fn new(id: StimulusId, groups: Vec<TimingGroup<Element>>) -> Self {
        Self {
            id,
            groups: GroupList::new(groups),
            background: [0, 0, 0, 255],
            frame_increment: 1,
            frames_per_cycle: 1,
            motion: (0.0, 0.0),
            offset: (0.0, 0.0),
            adjustable: false,
            pending_last: None,
            execute: true,
            hooks: HookCalls::default(),
        }
    }

    /// Single-group stimulus.
    pub fn single(id: StimulusId, elements: Vec<Element>, timing: TimingElement) -> Self {
        Self::new(id, vec![TimingGroup::new(elements, timing)])
    }

    pub fn with_background(mut self, background: [u8; 4]) -> Self {
        self.background = background;
        self
    }

    pub fn with_frames(mut self, frames_per_cycle: u32, frame_increment: u32) -> Self {
        self.frames_per_cycle = frames_per_cycle.max(1);
        self.frame_increment = frame_increment.max(1);
        self
    }

    pub fn with_motion(mut self, dx: f32, dy: f32) -> Self {
        self.motion = (dx, dy);
        self
    }

    pub fn adjustable(mut self, adjustable: bool) -> Self {
        self.adjustable = adjustable;
        self
    }

    pub fn set_execute(&mut self, execute: bool) {
        self.execute = execute;
    }

    /// Applied by `recompute_timing` at the next cycle boundary.
    pub fn schedule_last_group(&mut self, last: usize) {
        self.pending_last = Some(last);
    }

    pub fn hooks(&self) -> HookCalls {
        self.hooks
    }

    pub fn groups(&self) -> &GroupList<Element> {
        &self.groups
    }
}

fn paint_for(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(color[0], color[1], color[2], color[3]));
    paint
}

fn draw_element(target: &mut Pixmap, element: &Element, offset: (f32, f32)) {
    let cx = element.center.0 + offset.0;
    let cy = element.center.1 + offset.1;

    match &element.shape {
        Shape::Circle { radius, color } => {
            if let Some(path) = PathBuilder::from_circle(cx, cy, *radius) {
                target.fill_path(
                    &path,
                    &paint_for(*color),
                    FillRule::Winding,
                    Transform::identity(),
                    None,
                );
            }
        }
        Shape::Rectangle {
            width,
            height,
            color,
        } => {
            if let Some(rect) = Rect::from_xywh(cx - width / 2.0, cy - height / 2.0, *width, *height)
            {
                target.fill_rect(rect, &paint_for(*color), Transform::identity(), None);
            }
        }
        Shape::Arrow {
            direction,
            size,
            color,
        } => {
            let mut pb = PathBuilder::new();
            match direction {
                ArrowDirection::Right => {
                    pb.move_to(cx + size, cy);
                    pb.line_to(cx, cy - size);
                    pb.line_to(cx, cy + size);
                }
                ArrowDirection::Left => {
                    pb.move_to(cx - size, cy);
                    pb.line_to(cx, cy - size);
                    pb.line_to(cx, cy + size);
                }
                ArrowDirection::Up => {
                    pb.move_to(cx, cy - size);
                    pb.line_to(cx - size, cy);
                    pb.line_to(cx + size, cy);
                }
                ArrowDirection::Down => {
                    pb.move_to(cx, cy + size);
                    pb.line_to(cx - size, cy);
                    pb.line_to(cx + size, cy);
                }
            }
            pb.close();
            if let Some(path) = pb.finish() {
                target.fill_path(
                    &path,
                    &paint_for(*color),
                    FillRule::Winding,
                    Transform::identity(),
                    None,
                );
            }
        }
    }
}

impl Display for ShapeStimulus {
    type Surface = Pixmap;

    fn id(&self) -> StimulusId {
        self.id
    }

    fn compute_frame(&mut self, frame: u32) {
        self.hooks.compute_frame += 1;
        self.offset = (self.motion.0 * frame as f32, self.motion.1 * frame as f32);
    }

    fn clear_active_group(&mut self) {
        self.groups.clear();
    }

    fn advance_to_next_group(&mut self) {
        self.groups.advance();
    }

    fn active_group(&self) -> usize {
        self.groups.cursor()
    }

    fn render_active_group(&mut self, surface: &mut Pixmap, clear_background: bool) {
        self.hooks.renders += 1;
        if clear_background {
            let [r, g, b, a] = self.background;
            surface.fill(Color::from_rgba8(r, g, b, a));
        }
        if let Some(group) = self.groups.active() {
            for element in &group.elements {
                draw_element(surface, element, self.offset);
            }
        }
    }

    fn timing_of(&self, group: usize) -> TimingElement {
        self.groups.timing_of(group)
    }

    fn last_group_index(&self) -> usize {
        self.groups.last_index()
    }

    fn frame_increment(&self) -> u32 {
        self.frame_increment
    }

    fn frames_per_cycle(&self) -> u32 {
        self.frames_per_cycle
    }

    fn is_adjustable(&self) -> bool {
        self.adjustable
    }

    fn recompute_geometry(&mut self) {
        self.hooks.recompute += 1;
    }

    fn recompute_timing(&mut self) {
        if let Some(last) = self.pending_last.take() {
            self.groups.set_last_index(last);
        }
    }

    fn execute_flag(&self) -> bool {
        self.execute
    }
}
