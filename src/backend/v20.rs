//! Composer backend for 2.0 devices
//!
//! The modern protocol: validate the layer stack, accept whatever the
//! device decided, attach the client target buffer, present. Backpressure
//! comes from the retained present fence — before committing frame N the
//! backend waits out frame N-1's fence, so composition never runs more
//! than one frame ahead of the display.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::{DisplayBackend, ScreenDimensions, SurfaceHandle};
use crate::config::Config;
use crate::error::Error;
use crate::fence::{Fence, FENCE_WAIT_CAP};
use crate::hal::{ComposerHal2, PowerMode};
use crate::scheduler::{UpdateLoop, WindowId};
use crate::swapchain::FrameBuffer;
use crate::Result;

pub struct BackendV20<H: ComposerHal2> {
    hal: Arc<Mutex<H>>,
    update_loop: UpdateLoop,
    last_present: Option<Fence>,
    sleeping: bool,
    sync_before_set: bool,
    buffer_count: u32,
    window_created: bool,
}

impl<H: ComposerHal2 + 'static> BackendV20<H> {
    /// `deliver` receives the batched window updates from the scheduler.
    pub fn new(
        hal: Arc<Mutex<H>>,
        config: &Config,
        deliver: Box<dyn FnMut(&[WindowId])>,
    ) -> Result<Self> {
        // The device must have produced a display by now (construction
        // already waited for the initial hotplug).
        hal.lock().unwrap().active_config().ok_or(Error::NoDisplay)?;

        let gate_hal = hal.clone();
        let ack_hal = hal.clone();
        let update_loop = UpdateLoop::new(
            config,
            Box::new(move |enabled| {
                if let Err(code) = gate_hal.lock().unwrap().set_vsync_enabled(enabled) {
                    warn!("vsync {} returned {code}", if enabled { "enable" } else { "disable" });
                }
            }),
            deliver,
            Box::new(move |display, connected, _primary| {
                ack_hal.lock().unwrap().ack_hotplug(display, connected);
            }),
        )?;

        let mut backend = Self {
            hal,
            update_loop,
            last_present: None,
            sleeping: true,
            sync_before_set: config.sync_before_set,
            buffer_count: config.buffer_count,
            window_created: false,
        };
        backend.sleep_display(false);
        Ok(backend)
    }

    /// Buffer count the native window is created with.
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// Sender HAL callback threads post vsync/hotplug events into.
    pub fn event_sender(&self) -> calloop::channel::Sender<crate::hal::HalEvent> {
        self.update_loop.sender()
    }
}

impl<H: ComposerHal2 + 'static> DisplayBackend for BackendV20<H> {
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
        let mut acquire = frame.acquire;
        if self.sync_before_set {
            // Driver quirk: wait out the acquire fence on the CPU instead
            // of passing it through.
            if let Some(fence) = acquire.take() {
                fence.wait(FENCE_WAIT_CAP);
            }
        }

        let mut hal = self.hal.lock().unwrap();

        let outcome = hal.validate();
        if !outcome.ok() {
            debug!("validate failed: {}", outcome.status);
            return None;
        }
        if !outcome.clean() {
            // The device wants composition changes this backend cannot
            // apply mid-frame; drop it, the next one starts fresh.
            debug!(
                "validate required changes: {} type(s), {} request(s)",
                outcome.num_types, outcome.num_requests
            );
            return None;
        }
        if let Err(code) = hal.accept_changes() {
            debug!("accept changes failed: {code}");
            return None;
        }

        if let Err(code) = hal.set_client_target(0, frame.buffer, acquire) {
            warn!("set client target returned {code}");
        }

        let (result, present_fence) = hal.present();
        drop(hal);
        if let Err(code) = result {
            warn!("present returned {code}");
        }

        // Wait out the previous frame before letting the renderer run
        // ahead; then retain a duplicate of this frame's fence for the
        // next pass.
        if let Some(previous) = self.last_present.take() {
            previous.wait(FENCE_WAIT_CAP);
        }
        self.last_present = present_fence.as_ref().and_then(Fence::try_clone);

        // The present fence doubles as the buffer's release fence.
        present_fence
    }

    fn sleep_display(&mut self, sleep: bool) {
        if sleep == self.sleeping {
            return;
        }
        self.sleeping = sleep;
        if sleep {
            // Scheduler first: timers stop and vsync delivery is disabled
            // before the display powers down.
            self.update_loop.sleep();
            if let Err(code) = self.hal.lock().unwrap().set_power_mode(PowerMode::Off) {
                warn!("power off returned {code}");
            }
        } else {
            if let Err(code) = self.hal.lock().unwrap().set_power_mode(PowerMode::On) {
                warn!("power on returned {code}");
            }
            // Pending updates resume only after the panel is back up.
            self.update_loop.wake();
        }
    }

    fn refresh_rate(&mut self) -> f32 {
        self.hal
            .lock()
            .unwrap()
            .active_config()
            .map(|attrs| attrs.refresh_rate())
            .unwrap_or(60.0)
    }

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions> {
        let attrs = self.hal.lock().unwrap().active_config()?;
        let (physical_width, physical_height) = attrs.physical_size_mm().or_else(|| {
            warn!("failed to read display DPI");
            None
        })?;
        Some(ScreenDimensions {
            width: attrs.width,
            height: attrs.height,
            physical_width,
            physical_height,
        })
    }

    fn request_update(&mut self, window: WindowId) -> bool {
        if self.sleeping {
            return false;
        }
        self.update_loop.request_update(window)
    }

    fn dispatch_events(&mut self, timeout: Option<Duration>) {
        if let Err(e) = self.update_loop.dispatch(timeout) {
            warn!("event dispatch failed: {e}");
        }
    }
}

impl<H: ComposerHal2> Drop for BackendV20<H> {
    fn drop(&mut self) {
        let mut hal = self.hal.lock().unwrap();
        if let Err(code) = hal.set_vsync_enabled(false) {
            debug!("vsync disable on teardown returned {code}");
        }
        if let Err(code) = hal.set_power_mode(PowerMode::Off) {
            debug!("power off on teardown returned {code}");
        }
        // last_present drops here, closing the retained fence.
    }
}
