use std::collections::BTreeMap;

use stimex_core::{Device, ScreenId};
use tiny_skia::{Color, Pixmap, PremultipliedColorU8};

use crate::error::{PresentError, Result};

struct Screen {
    back: Pixmap,
    front: Pixmap,
}

/// Software device: one back and one front pixmap per screen.
///
/// `present` copies the back buffer to the front buffer and leaves the back
/// buffer as it was, so content drawn without clearing lands on top of the
/// frame currently shown. The active screen lives outside `parked`, so there
/// is always a surface to draw on.
pub struct PixmapDevice {
    width: u32,
    height: u32,
    active: ScreenId,
    current: Screen,
    parked: BTreeMap<ScreenId, Screen>,
    presents: u64,
}

impl PixmapDevice {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            width,
            height,
            active: ScreenId::default(),
            current: Self::alloc_screen(width, height)?,
            parked: BTreeMap::new(),
            presents: 0,
        })
    }

    fn alloc_screen(width: u32, height: u32) -> Result<Screen> {
        let alloc = || {
            let mut pm =
                Pixmap::new(width, height).ok_or(PresentError::Surface { width, height })?;
            pm.fill(Color::BLACK);
            Ok::<_, PresentError>(pm)
        };
        Ok(Screen {
            back: alloc()?,
            front: alloc()?,
        })
    }

    /// Makes `id` the active screen, allocating it on first use.
    fn switch_to(&mut self, id: ScreenId) -> Result<()> {
        if id == self.active {
            return Ok(());
        }
        let next = match self.parked.remove(&id) {
            Some(screen) => screen,
            None => Self::alloc_screen(self.width, self.height)?,
        };
        let previous = std::mem::replace(&mut self.current, next);
        self.parked.insert(self.active, previous);
        self.active = id;
        Ok(())
    }

    pub fn active_screen(&self) -> ScreenId {
        self.active
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn front(&self, screen: ScreenId) -> Option<&Pixmap> {
        if screen == self.active {
            Some(&self.current.front)
        } else {
            self.parked.get(&screen).map(|s| &s.front)
        }
    }

    /// Pixel currently visible on the active screen.
    pub fn visible_pixel(&self, x: u32, y: u32) -> Option<PremultipliedColorU8> {
        self.current.front.pixel(x, y)
    }
}

impl Device for PixmapDevice {
    type Surface = Pixmap;

    fn select_screen(&mut self, screen: ScreenId) {
        if let Err(e) = self.switch_to(screen) {
            tracing::warn!("cannot select screen {:?}: {}", screen, e);
        }
    }

    fn acquire_surface<R>(&mut self, render: impl FnOnce(&mut Pixmap) -> R) -> R {
        render(&mut self.current.back)
    }

    fn present(&mut self) -> stimex_core::Result<()> {
        let screen = &mut self.current;
        screen.front.data_mut().copy_from_slice(screen.back.data());
        self.presents += 1;
        Ok(())
    }
}
