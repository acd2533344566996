//! Raw FFI bindings for the Android composer HAL via libhybris
//!
//! Covers three surfaces: the classic hwc1 device ABI (function-pointer
//! table plus variable-length display content lists), the hwc2
//! compatibility layer, and the hybris native window. The safe wrappers
//! in `device.rs` and `window.rs` own every pointer that crosses this
//! boundary.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

// === Module / device common ABI (hardware.h) ===

#[repr(C)]
pub struct HwModuleMethods {
    pub open: Option<
        unsafe extern "C" fn(*const HwModule, *const c_char, *mut *mut HwDevice) -> c_int,
    >,
}

#[repr(C)]
pub struct HwModule {
    pub tag: u32,
    pub module_api_version: u16,
    pub hal_api_version: u16,
    pub id: *const c_char,
    pub name: *const c_char,
    pub author: *const c_char,
    pub methods: *mut HwModuleMethods,
    pub dso: *mut c_void,
    pub reserved: [u32; 32 - 7],
}

#[repr(C)]
pub struct HwDevice {
    pub tag: u32,
    pub version: u32,
    pub module: *mut HwModule,
    pub reserved: [u32; 12],
    pub close: Option<unsafe extern "C" fn(*mut HwDevice) -> c_int>,
}

pub const HWC_HARDWARE_MODULE_ID: &[u8] = b"hwcomposer\0";
pub const HWC_HARDWARE_COMPOSER: &[u8] = b"composer\0";

#[link(name = "hardware")]
extern "C" {
    pub fn hw_get_module(id: *const c_char, module: *mut *const HwModule) -> c_int;
}

// === hwc1 protocol (hardware/hwcomposer.h) ===

pub const HWC_DISPLAY_PRIMARY: c_int = 0;
pub const HWC_DISPLAY_EXTERNAL: c_int = 1;
pub const HWC_DISPLAY_VIRTUAL: c_int = 2;
pub const HWC_NUM_DISPLAY_TYPES: usize = 3;

pub const HWC_FRAMEBUFFER: i32 = 0;
pub const HWC_OVERLAY: i32 = 1;
pub const HWC_BACKGROUND: i32 = 2;
pub const HWC_FRAMEBUFFER_TARGET: i32 = 3;

pub const HWC_BLENDING_NONE: i32 = 0x0100;
pub const HWC_BLENDING_PREMULT: i32 = 0x0105;
pub const HWC_BLENDING_COVERAGE: i32 = 0x0405;

pub const HWC_TRANSFORM_ROT_90: u32 = 4;
pub const HWC_TRANSFORM_ROT_180: u32 = 3;
pub const HWC_TRANSFORM_ROT_270: u32 = 7;

pub const HWC_GEOMETRY_CHANGED: u32 = 1;
pub const HWC_SKIP_LAYER: u32 = 1;

pub const HWC_EVENT_VSYNC: c_int = 0;

pub const HWC_VSYNC_PERIOD: c_int = 1;

pub const HWC_DISPLAY_NO_ATTRIBUTE: u32 = 0;
pub const HWC_DISPLAY_VSYNC_PERIOD: u32 = 1;
pub const HWC_DISPLAY_WIDTH: u32 = 2;
pub const HWC_DISPLAY_HEIGHT: u32 = 3;
pub const HWC_DISPLAY_DPI_X: u32 = 4;
pub const HWC_DISPLAY_DPI_Y: u32 = 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HwcRect {
    pub left: c_int,
    pub top: c_int,
    pub right: c_int,
    pub bottom: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HwcFrect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

#[repr(C)]
pub struct HwcRegion {
    pub num_rects: usize,
    pub rects: *const HwcRect,
}

#[repr(C)]
pub union HwcSourceCrop {
    pub i: HwcRect,
    pub f: HwcFrect,
}

/// `hwc_layer_1_t`. The trailing reserved bytes keep the struct at the
/// size the header guarantees (120 bytes on LP64, 96 on 32-bit).
#[repr(C)]
pub struct HwcLayer1 {
    pub composition_type: i32,
    pub hints: u32,
    pub flags: u32,
    pub handle: *const c_void,
    pub transform: u32,
    pub blending: i32,
    pub source_crop: HwcSourceCrop,
    pub display_frame: HwcRect,
    pub visible_region_screen: HwcRegion,
    pub acquire_fence_fd: c_int,
    pub release_fence_fd: c_int,
    pub plane_alpha: u8,
    pub _pad: [u8; 3],
    pub surface_damage: HwcRegion,
    #[cfg(target_pointer_width = "64")]
    pub reserved: [u8; 8],
    #[cfg(target_pointer_width = "32")]
    pub reserved: [u8; 12],
}

/// `hwc_display_contents_1_t` with its trailing flexible layer array.
#[repr(C)]
pub struct HwcDisplayContents1 {
    pub retire_fence_fd: c_int,
    pub dpy: *mut c_void,
    pub sur: *mut c_void,
    pub flags: u32,
    pub num_hw_layers: usize,
    pub hw_layers: [HwcLayer1; 0],
}

#[repr(C)]
pub struct HwcProcs {
    pub invalidate: Option<unsafe extern "C" fn(*const HwcProcs)>,
    pub vsync: Option<unsafe extern "C" fn(*const HwcProcs, c_int, i64)>,
    pub hotplug: Option<unsafe extern "C" fn(*const HwcProcs, c_int, c_int)>,
}

#[repr(C)]
pub struct HwcComposerDevice1 {
    pub common: HwDevice,
    pub prepare: Option<
        unsafe extern "C" fn(*mut HwcComposerDevice1, usize, *mut *mut HwcDisplayContents1) -> c_int,
    >,
    pub set: Option<
        unsafe extern "C" fn(*mut HwcComposerDevice1, usize, *mut *mut HwcDisplayContents1) -> c_int,
    >,
    pub event_control:
        Option<unsafe extern "C" fn(*mut HwcComposerDevice1, c_int, c_int, c_int) -> c_int>,
    pub blank: Option<unsafe extern "C" fn(*mut HwcComposerDevice1, c_int, c_int) -> c_int>,
    pub query: Option<unsafe extern "C" fn(*mut HwcComposerDevice1, c_int, *mut c_int) -> c_int>,
    pub register_procs:
        Option<unsafe extern "C" fn(*mut HwcComposerDevice1, *const HwcProcs)>,
    pub dump: Option<unsafe extern "C" fn(*mut HwcComposerDevice1, *mut c_char, c_int)>,
    pub get_display_configs:
        Option<unsafe extern "C" fn(*mut HwcComposerDevice1, c_int, *mut u32, *mut usize) -> c_int>,
    pub get_display_attributes: Option<
        unsafe extern "C" fn(*mut HwcComposerDevice1, c_int, u32, *const u32, *mut i32) -> c_int,
    >,
    pub reserved_proc: [*mut c_void; 4],
}

// === hwc2 compatibility layer (libhybris) ===

pub type Hwc2DisplayT = u64;
pub type Hwc2ConfigT = u32;
pub type Hwc2ErrorT = i32;
pub type AndroidDataspaceT = i32;

pub const HWC2_ERROR_NONE: Hwc2ErrorT = 0;
pub const HWC2_ERROR_HAS_CHANGES: Hwc2ErrorT = 9;

pub const HWC2_POWER_MODE_OFF: c_int = 0;
pub const HWC2_POWER_MODE_ON: c_int = 2;

pub const HWC2_VSYNC_ENABLE: c_int = 1;
pub const HWC2_VSYNC_DISABLE: c_int = 2;

pub const HWC2_COMPOSITION_CLIENT: c_int = 1;
pub const HWC2_COMPOSITION_DEVICE: c_int = 2;

pub const HWC2_BLEND_MODE_NONE: c_int = 1;

pub const HAL_PIXEL_FORMAT_RGBA_8888: c_uint = 1;

pub const HAL_DATASPACE_UNKNOWN: AndroidDataspaceT = 0;

/// HWC2 display config structure from the compatibility layer.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HWC2DisplayConfig {
    pub id: Hwc2ConfigT,
    pub display: Hwc2DisplayT,
    pub width: i32,
    pub height: i32,
    pub vsync_period: i64,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

/// HWC2 event listener; extended structs embed it as their first field so
/// the callbacks can recover their context from the listener pointer.
#[repr(C)]
pub struct HWC2EventListener {
    pub on_vsync_received: Option<
        extern "C" fn(
            listener: *mut HWC2EventListener,
            sequence_id: i32,
            display: Hwc2DisplayT,
            timestamp: i64,
        ),
    >,
    pub on_hotplug_received: Option<
        extern "C" fn(
            listener: *mut HWC2EventListener,
            sequence_id: i32,
            display: Hwc2DisplayT,
            connected: bool,
            primary_display: bool,
        ),
    >,
    pub on_refresh_received: Option<
        extern "C" fn(listener: *mut HWC2EventListener, sequence_id: i32, display: Hwc2DisplayT),
    >,
}

#[repr(C)]
pub struct Hwc2CompatDevice {
    _data: [u8; 0],
}

#[repr(C)]
pub struct Hwc2CompatDisplay {
    _data: [u8; 0],
}

#[repr(C)]
pub struct Hwc2CompatLayer {
    _data: [u8; 0],
}

#[repr(C)]
pub struct Hwc2CompatOutFences {
    _data: [u8; 0],
}

#[repr(C)]
pub struct ANativeWindow {
    _data: [u8; 0],
}

#[repr(C)]
pub struct ANativeWindowBuffer {
    _data: [u8; 0],
}

/// Called by the hybris native window when a rendered buffer is ready to
/// be put on screen.
pub type HWCPresentCallback = Option<
    unsafe extern "C" fn(
        user_data: *mut c_void,
        window: *mut ANativeWindow,
        buffer: *mut ANativeWindowBuffer,
    ),
>;

#[link(name = "hybris-hwcomposerwindow")]
#[link(name = "hwc2")]
extern "C" {
    pub fn hybris_hwc2_initialize();

    pub fn hwc2_compat_device_new(use_vr_composer: bool) -> *mut Hwc2CompatDevice;

    pub fn hwc2_compat_device_register_callback(
        device: *mut Hwc2CompatDevice,
        listener: *mut HWC2EventListener,
        composer_sequence_id: c_int,
    );

    pub fn hwc2_compat_device_on_hotplug(
        device: *mut Hwc2CompatDevice,
        display_id: Hwc2DisplayT,
        connected: bool,
    );

    pub fn hwc2_compat_device_get_display_by_id(
        device: *mut Hwc2CompatDevice,
        id: Hwc2DisplayT,
    ) -> *mut Hwc2CompatDisplay;

    pub fn hwc2_compat_display_get_active_config(
        display: *mut Hwc2CompatDisplay,
    ) -> *mut HWC2DisplayConfig;

    pub fn hwc2_compat_display_accept_changes(display: *mut Hwc2CompatDisplay) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_create_layer(
        display: *mut Hwc2CompatDisplay,
    ) -> *mut Hwc2CompatLayer;

    pub fn hwc2_compat_display_destroy_layer(
        display: *mut Hwc2CompatDisplay,
        layer: *mut Hwc2CompatLayer,
    );

    pub fn hwc2_compat_display_get_release_fences(
        display: *mut Hwc2CompatDisplay,
        out_fences: *mut *mut Hwc2CompatOutFences,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_present(
        display: *mut Hwc2CompatDisplay,
        out_present_fence: *mut i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_client_target(
        display: *mut Hwc2CompatDisplay,
        slot: u32,
        buffer: *mut ANativeWindowBuffer,
        acquire_fence_fd: i32,
        dataspace: AndroidDataspaceT,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_power_mode(
        display: *mut Hwc2CompatDisplay,
        mode: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_vsync_enabled(
        display: *mut Hwc2CompatDisplay,
        enabled: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_validate(
        display: *mut Hwc2CompatDisplay,
        out_num_types: *mut u32,
        out_num_requests: *mut u32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_blend_mode(layer: *mut Hwc2CompatLayer, mode: c_int)
        -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_composition_type(
        layer: *mut Hwc2CompatLayer,
        comp_type: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_display_frame(
        layer: *mut Hwc2CompatLayer,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_source_crop(
        layer: *mut Hwc2CompatLayer,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_visible_region(
        layer: *mut Hwc2CompatLayer,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_out_fences_get_fence(
        fences: *mut Hwc2CompatOutFences,
        layer: *mut Hwc2CompatLayer,
    ) -> i32;

    pub fn hwc2_compat_out_fences_destroy(fences: *mut Hwc2CompatOutFences);

    // === hybris native window ===

    pub fn HWCNativeWindowCreate(
        width: c_uint,
        height: c_uint,
        format: c_uint,
        present: HWCPresentCallback,
        cb_data: *mut c_void,
    ) -> *mut ANativeWindow;

    pub fn HWCNativeWindowDestroy(window: *mut ANativeWindow);

    pub fn HWCNativeWindowSetBufferCount(window: *mut ANativeWindow, cnt: c_int) -> c_int;

    pub fn HWCNativeBufferGetFence(buf: *mut ANativeWindowBuffer) -> c_int;

    pub fn HWCNativeBufferSetFence(buf: *mut ANativeWindowBuffer, fd: c_int);
}
