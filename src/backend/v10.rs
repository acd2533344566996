//! Composer backend for 1.0 devices
//!
//! One display, one GPU-composited layer marked skip. The swap path
//! paces itself on the hardware vsync signal (with a refresh-period
//! grace so a silent driver cannot stall the UI), runs the two protocol
//! phases, then waits on and closes the frame's retire fence.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::{DisplayBackend, ScreenDimensions, SurfaceHandle};
use crate::error::Error;
use crate::fence::{Fence, FENCE_WAIT_CAP};
use crate::hal::{ComposerHal, PRIMARY_DISPLAY};
use crate::layer::{CompositionType, DisplayContents, Rect};
use crate::swapchain::FrameBuffer;
use crate::Result;

/// Wakes the swap path once per vsync. The HAL callback thread only
/// signals; no backend state is touched from it.
#[derive(Debug, Default)]
pub struct VsyncWaiter {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl VsyncWaiter {
    pub fn signal(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        self.cond.notify_all();
    }

    /// Wait for the next signal after this call. Returns whether one
    /// arrived within `timeout`.
    pub fn wait_next(&self, timeout: Duration) -> bool {
        let generation = self.generation.lock().unwrap();
        let seen = *generation;
        let (_guard, result) = self
            .cond
            .wait_timeout_while(generation, timeout, |g| *g == seen)
            .unwrap();
        !result.timed_out()
    }
}

pub struct BackendV10<H> {
    hal: Arc<Mutex<H>>,
    contents: Vec<DisplayContents>,
    waiter: Arc<VsyncWaiter>,
    refresh: Option<f32>,
    window_created: bool,
}

impl<H: ComposerHal> BackendV10<H> {
    pub fn new(hal: Arc<Mutex<H>>) -> Self {
        let mut backend = Self {
            hal,
            contents: Vec::new(),
            waiter: Arc::new(VsyncWaiter::default()),
            refresh: None,
            window_created: false,
        };
        backend.sleep_display(false);
        backend
    }

    /// Handle the vsync callback thread signals through.
    pub fn vsync_waiter(&self) -> Arc<VsyncWaiter> {
        self.waiter.clone()
    }

    fn vsync_interval(&mut self) -> Duration {
        let rate = self.refresh_rate();
        Duration::from_nanos((1_000_000_000.0 / rate) as u64)
    }
}

impl<H: ComposerHal> DisplayBackend for BackendV10<H> {
    fn create_window(&mut self, width: i32, height: i32) -> Result<SurfaceHandle> {
        if self.window_created {
            return Err(Error::WindowExists);
        }
        let rect = Rect::of_size(width, height);
        let mut contents = DisplayContents::new(1);
        let layer = contents.layer_mut(0);
        layer.reset();
        layer.composition = CompositionType::Gpu;
        layer.skip = true;
        layer.source_crop = rect;
        layer.display_frame = rect;
        self.contents = vec![contents];
        self.window_created = true;
        Ok(SurfaceHandle(0))
    }

    fn destroy_window(&mut self) {
        self.contents.clear();
        self.window_created = false;
    }

    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        if self.contents.is_empty() {
            warn!("swap without a window");
            return None;
        }
        // This generation has no acquire-fence path into the device.
        drop(frame);

        debug_assert!(self.contents[0].retire.is_none());

        // Pace on vsync; if the event never comes, swap anyway after one
        // refresh interval.
        let interval = self.vsync_interval();
        if !self.waiter.wait_next(interval) {
            debug!("no vsync within {:?}, swapping anyway", interval);
        }

        {
            let mut hal = self.hal.lock().unwrap();
            if let Err(code) = hal.prepare(&mut self.contents) {
                warn!("prepare returned {code}");
                return None;
            }
            if let Err(code) = hal.commit(&mut self.contents) {
                warn!("set returned {code}");
                return None;
            }
        }
        self.contents[0].geometry_changed = false;

        // The device is done with the previous frame once this signals.
        if let Some(retire) = self.contents[0].retire.take() {
            retire.wait(FENCE_WAIT_CAP);
        }
        // Stray release fences would be a device bug; close them.
        for layer in self.contents[0].layers_mut() {
            layer.acquire = None;
            layer.release = None;
        }
        None
    }

    fn sleep_display(&mut self, sleep: bool) {
        let mut hal = self.hal.lock().unwrap();
        if sleep {
            // Vsync delivery stops before the panel powers down; events
            // arriving mid-power-off trip some drivers.
            if let Err(code) = hal.set_vsync_enabled(PRIMARY_DISPLAY, false) {
                warn!("vsync disable returned {code}");
            }
            if let Err(code) = hal.blank(PRIMARY_DISPLAY, true) {
                warn!("blank returned {code}");
            }
        } else {
            if let Err(code) = hal.blank(PRIMARY_DISPLAY, false) {
                warn!("unblank returned {code}");
            }
            if let Err(code) = hal.set_vsync_enabled(PRIMARY_DISPLAY, true) {
                warn!("vsync enable returned {code}");
            }
            drop(hal);
            if let Some(contents) = self.contents.first_mut() {
                contents.geometry_changed = true;
            }
        }
    }

    fn refresh_rate(&mut self) -> f32 {
        if let Some(rate) = self.refresh {
            return rate;
        }
        let rate = match self.hal.lock().unwrap().vsync_period() {
            Some(period) if !period.is_zero() => {
                let hz = 1_000_000_000.0 / period.as_nanos() as f32;
                debug!("vsync: {:?}, {} fps", period, hz);
                hz
            }
            _ => {
                warn!("vsync period query failed, assuming 60 Hz");
                60.0
            }
        };
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::BufferHandle;
    use crate::testhal::FakeComposer;
    use std::time::Instant;

    fn frame() -> FrameBuffer {
        FrameBuffer {
            buffer: BufferHandle(1),
            acquire: None,
        }
    }

    #[test]
    fn swap_prefers_the_vsync_signal() {
        let fake = FakeComposer::new(0);
        let mut backend = BackendV10::new(Arc::new(Mutex::new(fake.clone())));
        backend.create_window(800, 600).unwrap();

        let waiter = backend.vsync_waiter();
        let signaler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(2));
            waiter.signal();
        });
        backend.swap_buffers(frame());
        signaler.join().unwrap();

        assert_eq!(fake.state().prepare_calls, 1);
        assert_eq!(fake.state().commit_calls, 1);
        // Retire fence was taken out of the list and closed.
        drop(backend);
        fake.assert_all_fences_closed();
    }

    #[test]
    fn swap_proceeds_without_vsync_after_grace() {
        let fake = FakeComposer::new(0);
        let mut backend = BackendV10::new(Arc::new(Mutex::new(fake.clone())));
        backend.create_window(800, 600).unwrap();

        let start = Instant::now();
        backend.swap_buffers(frame());
        // One refresh interval at 60 Hz, not an indefinite stall.
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(fake.state().commit_calls, 1);
    }

    #[test]
    fn sleep_orders_vsync_off_before_blank() {
        let fake = FakeComposer::new(0);
        let mut backend = BackendV10::new(Arc::new(Mutex::new(fake.clone())));
        fake.state().vsync_calls.clear();
        fake.state().blank_calls.clear();

        backend.sleep_display(true);
        {
            let state = fake.state();
            assert_eq!(state.vsync_calls, vec![(PRIMARY_DISPLAY, false)]);
            assert_eq!(state.blank_calls, vec![(PRIMARY_DISPLAY, true)]);
        }

        backend.sleep_display(false);
        let state = fake.state();
        assert_eq!(state.vsync_calls.last(), Some(&(PRIMARY_DISPLAY, true)));
        assert_eq!(state.blank_calls.last(), Some(&(PRIMARY_DISPLAY, false)));
    }
}
