//! Composer backend for 1.1+ devices
//!
//! The full pipeline: the renderer hands finished frames to a single-slot
//! swap queue and a dedicated composition thread drains it, running the
//! prepare/set protocol through the composition engine. The renderer
//! blocks only when it gets a full frame ahead of the compositor. Display
//! content descriptors live on the composition thread and are never
//! touched from anywhere else.
//!
//! Teardown flushes in-flight composition: the slot stops accepting new
//! frames, the worker drains what is pending and exits, and only then are
//! the shared descriptors dropped.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DisplayBackend, ScreenDimensions, SurfaceHandle};
use crate::config::Config;
use crate::engine::{CompositionEngine, OverlayPlane};
use crate::error::Error;
use crate::fence::Fence;
use crate::hal::{ComposerHal, PRIMARY_DISPLAY};
use crate::power::PowerController;
use crate::scheduler::{UpdateLoop, WindowId};
use crate::swapchain::{FrameBuffer, SwapSlot};
use crate::Result;

pub struct BackendV11<H> {
    hal: Arc<Mutex<H>>,
    power: PowerController<H>,
    update_loop: UpdateLoop,
    config: Config,
    num_displays: usize,
    slot: Option<Arc<SwapSlot>>,
    worker: Option<JoinHandle<()>>,
    /// Overlay planes handed over to the composition thread before its
    /// next pass.
    pending_planes: Arc<Mutex<Option<Vec<OverlayPlane>>>>,
    refresh: Option<f32>,
}

impl<H: ComposerHal + 'static> BackendV11<H> {
    /// `deliver` receives the batched window updates from the scheduler.
    pub fn new(
        hal: Arc<Mutex<H>>,
        num_displays: usize,
        config: Config,
        deliver: Box<dyn FnMut(&[WindowId])>,
    ) -> Result<Self> {
        let power = PowerController::new(hal.clone(), num_displays);

        let gate_hal = hal.clone();
        let hotplug_power = power.clone();
        let update_loop = UpdateLoop::new(
            &config,
            Box::new(move |enabled| {
                let result = gate_hal
                    .lock()
                    .unwrap()
                    .set_vsync_enabled(PRIMARY_DISPLAY, enabled);
                if let Err(code) = result {
                    warn!("vsync {} returned {code}", if enabled { "enable" } else { "disable" });
                }
            }),
            deliver,
            Box::new(move |display, connected, _primary| {
                hotplug_power.note_hotplug(display, connected);
            }),
        )?;

        let mut backend = Self {
            hal,
            power,
            update_loop,
            config,
            num_displays,
            slot: None,
            worker: None,
            pending_planes: Arc::new(Mutex::new(None)),
            refresh: None,
        };
        backend.sleep_display(false);
        Ok(backend)
    }

    /// Sender HAL callback threads post vsync/hotplug events into.
    pub fn event_sender(&self) -> calloop::channel::Sender<crate::hal::HalEvent> {
        self.update_loop.sender()
    }

    /// Replace the overlay planes requested for subsequent frames.
    pub fn set_overlay_planes(&mut self, planes: Vec<OverlayPlane>) {
        *self.pending_planes.lock().unwrap() = Some(planes);
    }
}

impl<H> BackendV11<H> {
    /// Stop accepting frames, drain what is in flight, and join the
    /// composition thread.
    fn join_worker(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.shut_down();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("composition thread panicked");
            }
        }
    }
}

impl<H: ComposerHal + 'static> DisplayBackend for BackendV11<H> {
    fn create_window(&mut self, width: i32, height: i32) -> Result<SurfaceHandle> {
        if self.slot.is_some() {
            return Err(Error::WindowExists);
        }
        info!("creating {}x{} composition surface", width, height);

        let slot = Arc::new(SwapSlot::new());
        let mut engine = CompositionEngine::new(
            self.hal.clone(),
            self.power.clone(),
            self.num_displays,
            (width, height),
            &self.config,
        );
        let worker_slot = slot.clone();
        let pending_planes = self.pending_planes.clone();

        let worker = std::thread::Builder::new()
            .name("hwc-compose".into())
            .spawn(move || {
                while let Some(frame) = worker_slot.take() {
                    if let Some(planes) = pending_planes.lock().unwrap().take() {
                        engine.set_overlay_planes(planes);
                    }
                    let buffer = frame.buffer;
                    let outcome = engine.present_frame(frame);
                    if !outcome.committed {
                        debug!("frame dropped by the device");
                    }
                    worker_slot.finish(buffer, outcome.release);
                }
                // Engine drops here, closing any retained retire fences.
            })
            .map_err(Error::Io)?;

        self.slot = Some(slot);
        self.worker = Some(worker);
        Ok(SurfaceHandle(0))
    }

    fn destroy_window(&mut self) {
        self.join_worker();
    }

    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        let Some(slot) = self.slot.clone() else {
            warn!("swap without a window");
            return None;
        };

        // A hotplug may have changed which display is powered; apply it
        // here, outside the callback context it was reported from.
        if self.power.reevaluate() {
            debug!("display set changed, geometry renegotiated");
        }

        // Release fence from this buffer's previous trip through the
        // compositor; the renderer waits on it before drawing again.
        let release = slot.collect_release(frame.buffer);

        if slot.submit(frame).is_err() {
            debug!("swap after surface teardown");
        }
        release
    }

    fn sleep_display(&mut self, sleep: bool) {
        if sleep == self.power.is_sleeping() {
            return;
        }
        if sleep {
            // Scheduler first, so vsync delivery is off before blanking.
            self.update_loop.sleep();
            self.power.sleep();
        } else {
            self.power.wake();
            self.update_loop.wake();
        }
    }

    fn refresh_rate(&mut self) -> f32 {
        if let Some(rate) = self.refresh {
            return rate;
        }
        let rate = self
            .hal
            .lock()
            .unwrap()
            .display_attributes(PRIMARY_DISPLAY)
            .map(|attrs| attrs.refresh_rate())
            .unwrap_or(60.0);
        self.refresh = Some(rate);
        rate
    }

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions> {
        let attrs = self.hal.lock().unwrap().display_attributes(PRIMARY_DISPLAY)?;
        let (physical_width, physical_height) = attrs.physical_size_mm()?;
        Some(ScreenDimensions {
            width: attrs.width,
            height: attrs.height,
            physical_width,
            physical_height,
        })
    }

    fn request_update(&mut self, window: WindowId) -> bool {
        self.update_loop.request_update(window)
    }

    fn dispatch_events(&mut self, timeout: Option<Duration>) {
        if let Err(e) = self.update_loop.dispatch(timeout) {
            warn!("event dispatch failed: {e}");
        }
    }
}

impl<H> Drop for BackendV11<H> {
    fn drop(&mut self) {
        // Flush in-flight composition before the shared descriptors go.
        self.join_worker();
    }
}
