//! Versioned composer backends
//!
//! Exactly one backend generation is live per process, selected from the
//! interpreted device version at startup. The toolkit side only sees the
//! [`DisplayBackend`] interface.

use std::time::Duration;

use crate::fence::Fence;
use crate::scheduler::WindowId;
use crate::swapchain::FrameBuffer;
use crate::Result;

pub mod v0;
pub mod v10;
pub mod v11;
pub mod v20;

pub use v0::BackendV0;
pub use v10::BackendV10;
pub use v11::BackendV11;
pub use v20::BackendV20;

/// Token for the (single) native rendering surface of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// Pixel and physical screen geometry reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenDimensions {
    pub width: i32,
    pub height: i32,
    pub physical_width: f32,
    pub physical_height: f32,
}

/// The one abstraction the windowing toolkit drives.
pub trait DisplayBackend {
    /// Create the native rendering surface. There is only ever one.
    fn create_window(&mut self, width: i32, height: i32) -> Result<SurfaceHandle>;

    fn destroy_window(&mut self);

    /// Hand a finished frame to the compositor. Blocks until backpressure
    /// allows the renderer to continue; returns the release fence for the
    /// submitted buffer's previous cycle, if one is owed.
    fn swap_buffers(&mut self, frame: FrameBuffer) -> Option<Fence>;

    fn sleep_display(&mut self, sleep: bool);

    fn refresh_rate(&mut self) -> f32;

    fn screen_dimensions(&mut self) -> Option<ScreenDimensions>;

    /// Whether the backend takes responsibility for waking this window for
    /// its next frame. `false` sends the caller back to its own timers.
    fn request_update(&mut self, window: WindowId) -> bool {
        let _ = window;
        false
    }

    /// Pump deferred work (timers, queued HAL events). Called from the
    /// owning thread's main loop.
    fn dispatch_events(&mut self, timeout: Option<Duration>) {
        let _ = timeout;
    }
}
