//! Native window plumbing
//!
//! Wraps the hybris `HWCNativeWindow`: EGL renders into it, and every
//! finished buffer comes back through the present callback together with
//! its acquire fence. The callback routes the buffer to whatever present
//! function the backend installed and writes the returned release fence
//! back onto the buffer so the buffer queue can reuse it safely.

use std::os::raw::{c_uint, c_void};

use tracing::warn;

use super::ffi;
use crate::fence::Fence;
use crate::layer::BufferHandle;
use crate::swapchain::FrameBuffer;

/// Present function installed by the backend assembly; takes the frame,
/// returns the buffer's release fence. Runs on the thread that swaps
/// buffers, which is the thread that owns the window.
pub type PresentFn = Box<dyn FnMut(FrameBuffer) -> Option<Fence>>;

struct PresentRouter {
    present: PresentFn,
}

unsafe extern "C" fn present_trampoline(
    user_data: *mut c_void,
    _window: *mut ffi::ANativeWindow,
    buffer: *mut ffi::ANativeWindowBuffer,
) {
    if user_data.is_null() || buffer.is_null() {
        return;
    }
    let router = &mut *(user_data as *mut PresentRouter);

    let acquire = Fence::from_raw(ffi::HWCNativeBufferGetFence(buffer));
    let frame = FrameBuffer {
        buffer: BufferHandle(buffer as usize),
        acquire,
    };

    let release = (router.present)(frame);
    ffi::HWCNativeBufferSetFence(buffer, release.map(Fence::into_raw).unwrap_or(-1));
}

/// Owns the `HWCNativeWindow` and the router handed to its callback.
pub struct HwcNativeWindow {
    window: *mut ffi::ANativeWindow,
    router: *mut PresentRouter,
}

impl HwcNativeWindow {
    /// Create a window of the given size; `present` runs on the thread
    /// that swaps buffers.
    pub fn new(width: u32, height: u32, buffer_count: u32, present: PresentFn) -> Option<Self> {
        let router = Box::into_raw(Box::new(PresentRouter { present }));
        let window = unsafe {
            ffi::HWCNativeWindowCreate(
                width as c_uint,
                height as c_uint,
                ffi::HAL_PIXEL_FORMAT_RGBA_8888,
                Some(present_trampoline),
                router as *mut c_void,
            )
        };
        if window.is_null() {
            // Window never existed, the router is still ours to free.
            drop(unsafe { Box::from_raw(router) });
            return None;
        }
        let result =
            unsafe { ffi::HWCNativeWindowSetBufferCount(window, buffer_count as i32) };
        if result != 0 {
            warn!("failed to set buffer count: {result}");
        }
        Some(Self { window, router })
    }

    /// Pointer for `eglCreateWindowSurface`.
    pub fn as_ptr(&self) -> *mut c_void {
        self.window as *mut c_void
    }
}

impl Drop for HwcNativeWindow {
    fn drop(&mut self) {
        unsafe {
            ffi::HWCNativeWindowDestroy(self.window);
            // No callback can be in flight once the window is destroyed.
            drop(Box::from_raw(self.router));
        }
    }
}
