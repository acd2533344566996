//! libhybris-backed assembly
//!
//! Everything that actually links against the Android HAL lives here,
//! behind the `hybris` cargo feature: the raw FFI surface, the device
//! wrappers implementing the HAL traits, the native window, and the
//! factory that picks a backend generation for the device that was found.

pub mod device;
pub mod ffi;
pub mod window;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

pub use device::{ComposerDevice, EventRelay, HybrisHwc1, HybrisHwc2};
pub use window::{HwcNativeWindow, PresentFn};

use crate::backend::{
    BackendV0, BackendV10, BackendV11, BackendV20, DisplayBackend, ScreenDimensions, SurfaceHandle,
};
use crate::config::Config;
use crate::fence::Fence;
use crate::hal::HalVersion;
use crate::scheduler::WindowId;
use crate::swapchain::FrameBuffer;
use crate::Result;

/// The live backend generation, selected once at startup.
pub enum HybrisBackend {
    V0(BackendV0<HybrisHwc1>),
    V10(BackendV10<HybrisHwc1>),
    V11(BackendV11<HybrisHwc1>),
    V20 {
        backend: BackendV20<HybrisHwc2>,
        hal: Arc<Mutex<HybrisHwc2>>,
    },
}

/// Open the composer and build the backend its version calls for.
pub fn create_backend(
    config: &Config,
    deliver: Box<dyn FnMut(&[WindowId])>,
) -> Result<(HybrisBackend, Arc<EventRelay>)> {
    let relay = EventRelay::new();
    let close_device = !config.has_workaround("no-close-hwc");

    match device::open_composer(relay.clone(), close_device)? {
        ComposerDevice::V1 {
            device,
            version,
            num_displays,
        } => {
            let hal = Arc::new(Mutex::new(device));
            match version {
                HalVersion::V0 => {
                    info!("using legacy composer backend");
                    Ok((HybrisBackend::V0(BackendV0::new(hal)), relay))
                }
                HalVersion::V10 => {
                    info!("using composer 1.0 backend");
                    let backend = BackendV10::new(hal);
                    relay.install_waiter(backend.vsync_waiter());
                    Ok((HybrisBackend::V10(backend), relay))
                }
                _ => {
                    info!("using composer 1.1+ backend, {num_displays} display slot(s)");
                    let backend =
                        BackendV11::new(hal, num_displays, config.clone(), deliver)?;
                    relay.install_sender(backend.event_sender());
                    Ok((HybrisBackend::V11(backend), relay))
                }
            }
        }
        ComposerDevice::V2(device) => {
            info!("using composer 2.0 backend");
            let hal = Arc::new(Mutex::new(device));
            let backend = BackendV20::new(hal.clone(), config, deliver)?;
            relay.install_sender(backend.event_sender());
            Ok((HybrisBackend::V20 { backend, hal }, relay))
        }
    }
}

impl DisplayBackend for HybrisBackend {
    fn create_window(&mut self, width: i32, height: i32) -> Result<SurfaceHandle> {
        match self {
            Self::V0(b) => b.create_window(width, height),
            Self::V10(b) => b.create_window(width, height),
            Self::V11(b) => b.create_window(width, height),
            Self::V20 { backend, hal } => {
                let handle = backend.create_window(width, height)?;
                hal.lock().unwrap().create_client_layer(width, height);
                Ok(handle)
            }
        }
    }

    fn destroy_window(&mut self) {
        match self {
            Self::V0(b) => b.destroy_window(),
            Self::V10(b) => b.destroy_window(),
            Self::V11(b) => b.destroy_window(),
            Self::V20 { backend, hal } => {
                hal.lock().unwrap().destroy_client_layer();
                backend.destroy_window();
            }
        }
    }

    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        match self {
            Self::V0(b) => b.swap_buffers(frame),
            Self::V10(b) => b.swap_buffers(frame),
            Self::V11(b) => b.swap_buffers(frame),
            Self::V20 { backend, .. } => backend.swap_buffers(frame),
        }
    }

    fn sleep_display(&mut self, sleep: bool) {
        match self {
            Self::V0(b) => b.sleep_display(sleep),
            Self::V10(b) => b.sleep_display(sleep),
            Self::V11(b) => b.sleep_display(sleep),
            Self::V20 { backend, .. } => backend.sleep_display(sleep),
        }
    }

    fn refresh_rate(&mut self) -> f32 {
        match self {
            Self::V0(b) => b.refresh_rate(),
            Self::V10(b) => b.refresh_rate(),
            Self::V11(b) => b.refresh_rate(),
            Self::V20 { backend, .. } => backend.refresh_rate(),
        }
    }

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions> {
        match self {
            Self::V0(b) => b.screen_dimensions(),
            Self::V10(b) => b.screen_dimensions(),
            Self::V11(b) => b.screen_dimensions(),
            Self::V20 { backend, .. } => backend.screen_dimensions(),
        }
    }

    fn request_update(&mut self, window: WindowId) -> bool {
        match self {
            Self::V0(b) => b.request_update(window),
            Self::V10(b) => b.request_update(window),
            Self::V11(b) => b.request_update(window),
            Self::V20 { backend, .. } => backend.request_update(window),
        }
    }

    fn dispatch_events(&mut self, timeout: Option<Duration>) {
        match self {
            Self::V0(b) => b.dispatch_events(timeout),
            Self::V10(b) => b.dispatch_events(timeout),
            Self::V11(b) => b.dispatch_events(timeout),
            Self::V20 { backend, .. } => backend.dispatch_events(timeout),
        }
    }
}

/// Shared handle to the live backend. The native window's present
/// callback and the toolkit facade reach the same state through it.
#[derive(Clone)]
pub struct SharedBackend(Arc<Mutex<HybrisBackend>>);

impl SharedBackend {
    pub fn new(backend: HybrisBackend) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }

    /// Create the EGL-facing native window; rendered buffers flow from
    /// its present callback into the backend's swap path.
    pub fn create_native_window(
        &self,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Option<HwcNativeWindow> {
        let shared = self.clone();
        HwcNativeWindow::new(
            width,
            height,
            buffer_count,
            Box::new(move |frame| shared.0.lock().unwrap().swap_buffers(frame)),
        )
    }
}

impl DisplayBackend for SharedBackend {
    fn create_window(&mut self, width: i32, height: i32) -> Result<SurfaceHandle> {
        self.0.lock().unwrap().create_window(width, height)
    }

    fn destroy_window(&mut self) {
        self.0.lock().unwrap().destroy_window();
    }

    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence> {
        self.0.lock().unwrap().swap_buffers(frame)
    }

    fn sleep_display(&mut self, sleep: bool) {
        self.0.lock().unwrap().sleep_display(sleep);
    }

    fn refresh_rate(&mut self) -> f32 {
        self.0.lock().unwrap().refresh_rate()
    }

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions> {
        self.0.lock().unwrap().screen_dimensions()
    }

    fn request_update(&mut self, window: WindowId) -> bool {
        self.0.lock().unwrap().request_update(window)
    }

    fn dispatch_events(&mut self, timeout: Option<Duration>) {
        self.0.lock().unwrap().dispatch_events(timeout);
    }
}
