//! Legacy composer backend (pre-1.0 devices)
//!
//! The oldest adaptations know nothing about fences or per-display lists:
//! the layer list only exists to carry the geometry-changed flag, and the
//! toolkit's buffer swap does the actual posting. Sleeping is a null
//! commit on the device side.

use std::sync::{Arc, Mutex};

use tracing::warn;

use super::{DisplayBackend, ScreenDimensions, SurfaceHandle};
use crate::error::Error;
use crate::fence::Fence;
use crate::hal::{ComposerHal, PRIMARY_DISPLAY};
use crate::layer::DisplayContents;
use crate::swapchain::FrameBuffer;
use crate::Result;

pub struct BackendV0<H> {
    hal: Arc<Mutex<H>>,
    contents: Vec<DisplayContents>,
    window_created: bool,
}

impl<H: ComposerHal> BackendV0<H> {
    pub fn new(hal: Arc<Mutex<H>>) -> Self {
        let mut contents = DisplayContents::new(0);
        contents.geometry_changed = true;
        Self {
            hal,
            contents: vec![contents],
            window_created: false,
        }
    }
}

impl<H: ComposerHal> DisplayBackend for BackendV0<H> {
    fn create_window(&mut self, _width: i32, _height: i32) -> Result<SurfaceHandle> {
        if self.window_created {
            return Err(Error::WindowExists);
        }
        self.window_created = true;
        Ok(SurfaceHandle(0))
    }

    fn destroy_window(&mut self) {
        self.window_created = false;
    }

    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        // No fence protocol on this generation; an acquire fence handed in
        // anyway is closed by the drop.
        drop(frame);

        let mut hal = self.hal.lock().unwrap();
        if let Err(code) = hal.prepare(&mut self.contents) {
            warn!("prepare returned {code}");
        }
        if let Err(code) = hal.commit(&mut self.contents) {
            warn!("set returned {code}");
        }
        self.contents[0].geometry_changed = false;
        None
    }

    fn sleep_display(&mut self, sleep: bool) {
        if sleep {
            if let Err(code) = self.hal.lock().unwrap().blank(PRIMARY_DISPLAY, true) {
                warn!("blank returned {code}");
            }
        } else {
            self.contents[0].geometry_changed = true;
            if let Err(code) = self.hal.lock().unwrap().blank(PRIMARY_DISPLAY, false) {
                warn!("unblank returned {code}");
            }
        }
    }

    fn refresh_rate(&mut self) -> f32 {
        match self.hal.lock().unwrap().vsync_period() {
            Some(period) if !period.is_zero() => {
                1_000_000_000.0 / period.as_nanos() as f32
            }
            _ => {
                warn!("vsync period query failed, assuming 60 Hz");
                60.0
            }
        }
    }

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions> {
        None
    }
}
