//! Toolkit-facing facade
//!
//! Owns a backend and presents the small surface the windowing toolkit
//! integration calls: screen geometry and refresh rate (queried once and
//! cached), native window creation, buffer swaps, display sleep, and the
//! out-of-band `displayoff`/`displayon` resource strings a higher-level
//! compositor process uses to toggle the panel.
//!
//! Screen geometry resolution order: environment overrides win, then the
//! device's own attributes, then warned-about fallback values.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{DisplayBackend, ScreenDimensions, SurfaceHandle};
use crate::config::Config;
use crate::fence::Fence;
use crate::scheduler::WindowId;
use crate::swapchain::FrameBuffer;
use crate::Result;

const FALLBACK_WIDTH: i32 = 800;
const FALLBACK_HEIGHT: i32 = 600;
const FALLBACK_DPI: f32 = 100.0;
const MM_PER_INCH: f32 = 25.4;

pub struct HwcContext<B> {
    backend: B,
    config: Config,
    display_off: bool,
    window_created: bool,
    refresh_rate: f32,
    dimensions: ScreenDimensions,
}

impl<B: DisplayBackend> HwcContext<B> {
    pub fn new(mut backend: B, config: Config) -> Self {
        let refresh_rate = backend.refresh_rate();
        let dimensions = Self::resolve_dimensions(&mut backend, &config);
        info!(
            "screen: {}x{} px, {:.0}x{:.0} mm, {:.1} Hz",
            dimensions.width,
            dimensions.height,
            dimensions.physical_width,
            dimensions.physical_height,
            refresh_rate
        );
        Self {
            backend,
            config,
            display_off: false,
            window_created: false,
            refresh_rate,
            dimensions,
        }
    }

    fn resolve_dimensions(backend: &mut B, config: &Config) -> ScreenDimensions {
        let probed = backend.screen_dimensions();

        let (width, height) = config
            .size_override
            .or_else(|| probed.map(|d| (d.width, d.height)))
            .unwrap_or_else(|| {
                warn!(
                    "cannot determine screen size, falling back to {}x{}",
                    FALLBACK_WIDTH, FALLBACK_HEIGHT
                );
                (FALLBACK_WIDTH, FALLBACK_HEIGHT)
            });

        let (physical_width, physical_height) = config
            .physical_override
            .or_else(|| probed.map(|d| (d.physical_width, d.physical_height)))
            .unwrap_or_else(|| {
                warn!(
                    "cannot determine physical screen size, assuming {} DPI",
                    FALLBACK_DPI
                );
                (
                    width as f32 * MM_PER_INCH / FALLBACK_DPI,
                    height as f32 * MM_PER_INCH / FALLBACK_DPI,
                )
            });

        ScreenDimensions {
            width,
            height,
            physical_width,
            physical_height,
        }
    }

    /// Cached refresh rate in Hz.
    pub fn refresh_rate(&self) -> f32 {
        self.refresh_rate
    }

    /// Cached screen size in pixels.
    pub fn screen_size(&self) -> (i32, i32) {
        (self.dimensions.width, self.dimensions.height)
    }

    /// Cached physical screen size in millimetres.
    pub fn physical_screen_size(&self) -> (f32, f32) {
        (
            self.dimensions.physical_width,
            self.dimensions.physical_height,
        )
    }

    /// Create the native rendering surface at screen size. There can only
    /// be one.
    pub fn create_native_window(&mut self) -> Result<SurfaceHandle> {
        let (width, height) = self.screen_size();
        let handle = self.backend.create_window(width, height)?;
        self.window_created = true;
        Ok(handle)
    }

    pub fn destroy_native_window(&mut self, _handle: SurfaceHandle) {
        self.backend.destroy_window();
        self.window_created = false;
    }

    /// Swap a finished frame to the display. While the display is off the
    /// frame is dropped; the renderer has no business producing frames
    /// nobody can see.
    pub fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        if self.display_off {
            warn!("swap requested while display is off");
            return None;
        }
        self.backend.swap_buffers(frame)
    }

    pub fn sleep_display(&mut self, sleep: bool) {
        if sleep {
            debug!("display sleep");
        } else {
            debug!("display wake");
        }
        self.display_off = sleep;
        self.backend.sleep_display(sleep);
    }

    /// Whether the scheduler will wake this window for its next frame.
    pub fn request_update(&mut self, window: WindowId) -> bool {
        self.backend.request_update(window)
    }

    /// Out-of-band control strings from the platform. Returns whether the
    /// resource was recognized.
    pub fn platform_resource(&mut self, resource: &str) -> bool {
        match resource.to_ascii_lowercase().as_str() {
            "displayoff" => {
                self.sleep_display(true);
                true
            }
            "displayon" => {
                self.sleep_display(false);
                true
            }
            _ => false,
        }
    }

    /// Pump the backend's deferred work from the toolkit main loop.
    pub fn dispatch_events(&mut self, timeout: Option<Duration>) {
        self.backend.dispatch_events(timeout);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
