//! Safe wrappers around the composer devices
//!
//! `HybrisHwc1` drives the function-pointer table of a 1.x device and
//! marshals [`DisplayContents`] into the raw variable-length lists the ABI
//! wants; `HybrisHwc2` drives the hwc2 compatibility layer. Both forward
//! their asynchronous callbacks through an [`EventRelay`] that only ever
//! enqueues.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem::{align_of, size_of};
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::ffi;
use crate::backend::v10::VsyncWaiter;
use crate::error::Error;
use crate::fence::Fence;
use crate::hal::{
    interpreted_version, ComposerHal, ComposerHal2, DisplayAttributes, HalCapabilities, HalEvent,
    HalVersion, PowerMode, ValidateOutcome, DEVICE_API_VERSION_1_5,
};
use crate::layer::{BlendMode, BufferHandle, CompositionType, DisplayContents, Transform};

/// Distinguishes consecutive composer registrations of this process.
static COMPOSER_SEQUENCE_ID: AtomicI32 = AtomicI32::new(0);

/// Fan-out point for HAL callback threads. Callbacks signal or enqueue
/// through whatever sinks are installed; installation happens after the
/// backend (and its event channel) exists.
#[derive(Default)]
pub struct EventRelay {
    inner: Mutex<RelaySinks>,
}

#[derive(Default)]
struct RelaySinks {
    sender: Option<calloop::channel::Sender<HalEvent>>,
    waiter: Option<Arc<VsyncWaiter>>,
}

impl EventRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn install_sender(&self, sender: calloop::channel::Sender<HalEvent>) {
        self.inner.lock().unwrap().sender = Some(sender);
    }

    pub fn install_waiter(&self, waiter: Arc<VsyncWaiter>) {
        self.inner.lock().unwrap().waiter = Some(waiter);
    }

    pub fn post(&self, event: HalEvent) {
        let sinks = self.inner.lock().unwrap();
        if let Some(sender) = &sinks.sender {
            sender.send(event).ok();
        }
        if let HalEvent::Vsync { .. } = event {
            if let Some(waiter) = &sinks.waiter {
                waiter.signal();
            }
        }
    }
}

// === hwc1 ===

struct ProcsBlock {
    procs: ffi::HwcProcs,
    relay: Arc<EventRelay>,
}

unsafe extern "C" fn hwc1_invalidate(procs: *const ffi::HwcProcs) {
    let block = &*(procs as *const ProcsBlock);
    block.relay.post(HalEvent::Refresh { display: 0 });
}

unsafe extern "C" fn hwc1_vsync(procs: *const ffi::HwcProcs, display: c_int, timestamp: i64) {
    let block = &*(procs as *const ProcsBlock);
    block.relay.post(HalEvent::Vsync {
        display: display as u64,
        timestamp_ns: timestamp,
    });
}

unsafe extern "C" fn hwc1_hotplug(procs: *const ffi::HwcProcs, display: c_int, connected: c_int) {
    let block = &*(procs as *const ProcsBlock);
    block.relay.post(HalEvent::Hotplug {
        display: display as u64,
        connected: connected != 0,
        primary: display == ffi::HWC_DISPLAY_PRIMARY,
    });
}

/// One raw `hwc_display_contents_1_t` allocation, sized for a fixed layer
/// count and reallocated whenever that count changes.
struct RawContents {
    ptr: *mut ffi::HwcDisplayContents1,
    layers: usize,
}

impl RawContents {
    fn layout(layers: usize) -> Layout {
        let size =
            size_of::<ffi::HwcDisplayContents1>() + layers * size_of::<ffi::HwcLayer1>();
        let align = align_of::<ffi::HwcDisplayContents1>().max(align_of::<ffi::HwcLayer1>());
        Layout::from_size_align(size, align).unwrap()
    }

    fn new(layers: usize) -> Self {
        let ptr = unsafe { alloc_zeroed(Self::layout(layers)) } as *mut ffi::HwcDisplayContents1;
        assert!(!ptr.is_null());
        unsafe {
            (*ptr).retire_fence_fd = -1;
            (*ptr).num_hw_layers = layers;
        }
        Self { ptr, layers }
    }

    fn layer(&self, index: usize) -> *mut ffi::HwcLayer1 {
        debug_assert!(index < self.layers);
        unsafe { ((*self.ptr).hw_layers.as_ptr() as *mut ffi::HwcLayer1).add(index) }
    }
}

impl Drop for RawContents {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr as *mut u8, Self::layout(self.layers)) };
    }
}

unsafe impl Send for RawContents {}

/// Whether a marshalling step transfers fence ownership to the device.
#[derive(PartialEq)]
enum FenceHandling {
    Borrow,
    Transfer,
}

/// A 1.x composer device.
pub struct HybrisHwc1 {
    device: *mut ffi::HwcComposerDevice1,
    version: u32,
    raw: Vec<RawContents>,
    raw_list: Vec<*mut ffi::HwcDisplayContents1>,
    _procs: Box<ProcsBlock>,
}

unsafe impl Send for HybrisHwc1 {}

impl HybrisHwc1 {
    /// Wrap an opened device and register the event callbacks.
    pub fn new(device: *mut ffi::HwcComposerDevice1, relay: Arc<EventRelay>) -> Self {
        let version = unsafe { interpreted_version((*device).common.version) };
        let procs = Box::new(ProcsBlock {
            procs: ffi::HwcProcs {
                invalidate: Some(hwc1_invalidate),
                vsync: Some(hwc1_vsync),
                hotplug: Some(hwc1_hotplug),
            },
            relay,
        });
        if let Some(register) = unsafe { (*device).register_procs } {
            unsafe { register(device, &procs.procs) };
        }
        Self {
            device,
            version,
            raw: Vec::new(),
            raw_list: Vec::new(),
            _procs: procs,
        }
    }

    fn sync_to_raw(&mut self, contents: &mut [DisplayContents], handling: FenceHandling) {
        // Rebuild raw allocations to match the descriptor shapes.
        if self.raw.len() != contents.len()
            || self
                .raw
                .iter()
                .zip(contents.iter())
                .any(|(raw, c)| raw.layers != c.num_layers())
        {
            self.raw = contents
                .iter()
                .map(|c| RawContents::new(c.num_layers()))
                .collect();
            self.raw_list = self.raw.iter().map(|r| r.ptr).collect();
        }

        for (raw, descriptor) in self.raw.iter().zip(contents.iter_mut()) {
            unsafe {
                (*raw.ptr).retire_fence_fd = -1;
                (*raw.ptr).dpy = std::ptr::null_mut();
                (*raw.ptr).sur = std::ptr::null_mut();
                (*raw.ptr).flags = if descriptor.geometry_changed {
                    ffi::HWC_GEOMETRY_CHANGED
                } else {
                    0
                };
            }
            for index in 0..descriptor.num_layers() {
                let layer = descriptor.layer_mut(index);
                let raw_layer = raw.layer(index);
                unsafe {
                    (*raw_layer).composition_type = match layer.composition {
                        CompositionType::Gpu => ffi::HWC_FRAMEBUFFER,
                        CompositionType::Overlay => ffi::HWC_OVERLAY,
                        CompositionType::GpuTarget => ffi::HWC_FRAMEBUFFER_TARGET,
                    };
                    (*raw_layer).hints = layer.hints;
                    (*raw_layer).flags = if layer.skip { ffi::HWC_SKIP_LAYER } else { 0 };
                    (*raw_layer).handle = layer
                        .buffer
                        .map(|b| b.as_ptr() as *const c_void)
                        .unwrap_or(std::ptr::null());
                    (*raw_layer).transform = match layer.transform {
                        Transform::None => 0,
                        Transform::Rot90 => ffi::HWC_TRANSFORM_ROT_90,
                        Transform::Rot180 => ffi::HWC_TRANSFORM_ROT_180,
                        Transform::Rot270 => ffi::HWC_TRANSFORM_ROT_270,
                    };
                    (*raw_layer).blending = match layer.blending {
                        BlendMode::None => ffi::HWC_BLENDING_NONE,
                        BlendMode::Premultiplied => ffi::HWC_BLENDING_PREMULT,
                        BlendMode::Coverage => ffi::HWC_BLENDING_COVERAGE,
                    };
                    // Sub-pixel-capable devices read the float form; older
                    // ones the integer form. The union covers both.
                    if let Some(f) = layer.source_crop_f {
                        (*raw_layer).source_crop.f = ffi::HwcFrect {
                            left: f.left,
                            top: f.top,
                            right: f.right,
                            bottom: f.bottom,
                        };
                    } else {
                        (*raw_layer).source_crop.i = ffi::HwcRect {
                            left: layer.source_crop.left,
                            top: layer.source_crop.top,
                            right: layer.source_crop.right,
                            bottom: layer.source_crop.bottom,
                        };
                    }
                    (*raw_layer).display_frame = ffi::HwcRect {
                        left: layer.display_frame.left,
                        top: layer.display_frame.top,
                        right: layer.display_frame.right,
                        bottom: layer.display_frame.bottom,
                    };
                    // Visible region is always the single destination rect.
                    (*raw_layer).visible_region_screen = ffi::HwcRegion {
                        num_rects: 1,
                        rects: &(*raw_layer).display_frame,
                    };
                    (*raw_layer).surface_damage = ffi::HwcRegion {
                        num_rects: 0,
                        rects: std::ptr::null(),
                    };
                    (*raw_layer).plane_alpha = 255;
                    (*raw_layer).acquire_fence_fd = match handling {
                        // The device consumes acquire fences during set;
                        // prepare only inspects them.
                        FenceHandling::Transfer => {
                            layer.acquire.take().map(Fence::into_raw).unwrap_or(-1)
                        }
                        FenceHandling::Borrow => {
                            layer.acquire.as_ref().map(Fence::as_raw).unwrap_or(-1)
                        }
                    };
                    (*raw_layer).release_fence_fd = -1;
                }
            }
        }
    }

    fn sync_types_from_raw(&self, contents: &mut [DisplayContents]) {
        for (raw, descriptor) in self.raw.iter().zip(contents.iter_mut()) {
            for index in 0..descriptor.num_layers() {
                let raw_layer = raw.layer(index);
                let composition = match unsafe { (*raw_layer).composition_type } {
                    ffi::HWC_OVERLAY => CompositionType::Overlay,
                    ffi::HWC_FRAMEBUFFER_TARGET => CompositionType::GpuTarget,
                    _ => CompositionType::Gpu,
                };
                descriptor.layer_mut(index).composition = composition;
            }
        }
    }

    fn sync_fences_from_raw(&self, contents: &mut [DisplayContents]) {
        for (raw, descriptor) in self.raw.iter().zip(contents.iter_mut()) {
            unsafe {
                descriptor.retire = Fence::from_raw((*raw.ptr).retire_fence_fd);
                (*raw.ptr).retire_fence_fd = -1;
            }
            for index in 0..descriptor.num_layers() {
                let raw_layer = raw.layer(index);
                unsafe {
                    descriptor.layer_mut(index).release =
                        Fence::from_raw((*raw_layer).release_fence_fd);
                    (*raw_layer).release_fence_fd = -1;
                    // Ownership of the acquire fd passed to the device.
                    (*raw_layer).acquire_fence_fd = -1;
                }
            }
        }
    }
}

impl ComposerHal for HybrisHwc1 {
    fn capabilities(&self) -> HalCapabilities {
        HalCapabilities {
            // The float source crop exists from 1.3 on.
            sub_pixel_crop: self.version >= 0x0103_0001 && self.version <= DEVICE_API_VERSION_1_5,
        }
    }

    fn prepare(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32> {
        self.sync_to_raw(contents, FenceHandling::Borrow);
        let Some(prepare) = (unsafe { (*self.device).prepare }) else {
            return Err(-1);
        };
        let status = unsafe {
            prepare(self.device, self.raw_list.len(), self.raw_list.as_mut_ptr())
        };
        if status != 0 {
            return Err(status);
        }
        self.sync_types_from_raw(contents);
        Ok(())
    }

    fn commit(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32> {
        self.sync_to_raw(contents, FenceHandling::Transfer);
        let Some(set) = (unsafe { (*self.device).set }) else {
            return Err(-1);
        };
        let status =
            unsafe { set(self.device, self.raw_list.len(), self.raw_list.as_mut_ptr()) };
        if status != 0 {
            return Err(status);
        }
        self.sync_fences_from_raw(contents);
        Ok(())
    }

    fn blank(&mut self, display: usize, blank: bool) -> Result<(), i32> {
        let Some(blank_fn) = (unsafe { (*self.device).blank }) else {
            return Err(-1);
        };
        let status =
            unsafe { blank_fn(self.device, display as c_int, if blank { 1 } else { 0 }) };
        if status != 0 {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn set_vsync_enabled(&mut self, display: usize, enabled: bool) -> Result<(), i32> {
        let Some(event_control) = (unsafe { (*self.device).event_control }) else {
            return Err(-1);
        };
        let status = unsafe {
            event_control(
                self.device,
                display as c_int,
                ffi::HWC_EVENT_VSYNC,
                if enabled { 1 } else { 0 },
            )
        };
        if status != 0 {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn display_attributes(&mut self, display: usize) -> Option<DisplayAttributes> {
        let get_configs = unsafe { (*self.device).get_display_configs }?;
        let get_attributes = unsafe { (*self.device).get_display_attributes }?;

        let mut config: u32 = 0;
        let mut count: usize = 1;
        let status =
            unsafe { get_configs(self.device, display as c_int, &mut config, &mut count) };
        if status != 0 || count == 0 {
            // Not connected.
            return None;
        }

        let attributes = [
            ffi::HWC_DISPLAY_VSYNC_PERIOD,
            ffi::HWC_DISPLAY_WIDTH,
            ffi::HWC_DISPLAY_HEIGHT,
            ffi::HWC_DISPLAY_DPI_X,
            ffi::HWC_DISPLAY_DPI_Y,
            ffi::HWC_DISPLAY_NO_ATTRIBUTE,
        ];
        let mut values = [0i32; 6];
        let status = unsafe {
            get_attributes(
                self.device,
                display as c_int,
                config,
                attributes.as_ptr(),
                values.as_mut_ptr(),
            )
        };
        if status != 0 {
            return None;
        }
        Some(DisplayAttributes {
            width: values[1],
            height: values[2],
            vsync_period: Duration::from_nanos(values[0].max(0) as u64),
            // The device reports DPI in thousandths.
            dpi_x: values[3] as f32 / 1000.0,
            dpi_y: values[4] as f32 / 1000.0,
        })
    }

    fn vsync_period(&mut self) -> Option<Duration> {
        let query = unsafe { (*self.device).query }?;
        let mut value: c_int = 0;
        let status = unsafe { query(self.device, ffi::HWC_VSYNC_PERIOD, &mut value) };
        if status != 0 || value <= 0 {
            None
        } else {
            Some(Duration::from_nanos(value as u64))
        }
    }
}

impl Drop for HybrisHwc1 {
    fn drop(&mut self) {
        let _ = self.set_vsync_enabled(0, false);
        unsafe {
            if let Some(close) = (*self.device).common.close {
                let status = close(self.device as *mut ffi::HwDevice);
                if status != 0 {
                    warn!("device close returned {status}");
                }
            }
        }
    }
}

// === hwc2 ===

struct ListenerBlock {
    listener: ffi::HWC2EventListener,
    relay: Arc<EventRelay>,
    primary_display: Mutex<ffi::Hwc2DisplayT>,
}

extern "C" fn hwc2_vsync(
    listener: *mut ffi::HWC2EventListener,
    _sequence_id: i32,
    display: ffi::Hwc2DisplayT,
    timestamp: i64,
) {
    let block = unsafe { &*(listener as *const ListenerBlock) };
    block.relay.post(HalEvent::Vsync {
        display,
        timestamp_ns: timestamp,
    });
}

extern "C" fn hwc2_hotplug(
    listener: *mut ffi::HWC2EventListener,
    sequence_id: i32,
    display: ffi::Hwc2DisplayT,
    connected: bool,
    primary_display: bool,
) {
    debug!(
        "hotplug({sequence_id}, {display}, {}, {})",
        if connected { "connected" } else { "disconnected" },
        if primary_display { "primary" } else { "external" }
    );
    let block = unsafe { &*(listener as *const ListenerBlock) };
    if primary_display {
        *block.primary_display.lock().unwrap() = display;
    }
    block.relay.post(HalEvent::Hotplug {
        display,
        connected,
        primary: primary_display,
    });
}

extern "C" fn hwc2_refresh(
    listener: *mut ffi::HWC2EventListener,
    _sequence_id: i32,
    display: ffi::Hwc2DisplayT,
) {
    let block = unsafe { &*(listener as *const ListenerBlock) };
    block.relay.post(HalEvent::Refresh { display });
}

/// A 2.0 composer device (through the compatibility layer), bound to its
/// primary display and one client layer.
pub struct HybrisHwc2 {
    device: *mut ffi::Hwc2CompatDevice,
    display: *mut ffi::Hwc2CompatDisplay,
    layer: *mut ffi::Hwc2CompatLayer,
    close_device: bool,
    _listener: Box<ListenerBlock>,
}

unsafe impl Send for HybrisHwc2 {}

impl HybrisHwc2 {
    /// Open the composer, register callbacks, and wait (bounded) for the
    /// primary display to appear.
    pub fn open(relay: Arc<EventRelay>, close_device: bool) -> crate::Result<Self> {
        unsafe { ffi::hybris_hwc2_initialize() };

        let mut listener = Box::new(ListenerBlock {
            listener: ffi::HWC2EventListener {
                on_vsync_received: Some(hwc2_vsync),
                on_hotplug_received: Some(hwc2_hotplug),
                on_refresh_received: Some(hwc2_refresh),
            },
            relay,
            primary_display: Mutex::new(0),
        });

        let device = unsafe { ffi::hwc2_compat_device_new(false) };
        if device.is_null() {
            return Err(Error::HalInit("hwc2_compat_device_new failed".into()));
        }
        unsafe {
            ffi::hwc2_compat_device_register_callback(
                device,
                &mut listener.listener,
                COMPOSER_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed),
            );
        }

        // The initial hotplug may take a moment to arrive; wait at most 5 s
        // for the primary display to materialize.
        let mut display = std::ptr::null_mut();
        for _ in 0..5000 {
            let id = *listener.primary_display.lock().unwrap();
            display = unsafe { ffi::hwc2_compat_device_get_display_by_id(device, id) };
            if !display.is_null() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if display.is_null() {
            return Err(Error::NoDisplay);
        }
        info!("primary display ready");

        Ok(Self {
            device,
            display,
            layer: std::ptr::null_mut(),
            close_device,
            _listener: listener,
        })
    }

    /// Create the client-composited layer covering the whole display.
    pub fn create_client_layer(&mut self, width: i32, height: i32) {
        let layer = unsafe { ffi::hwc2_compat_display_create_layer(self.display) };
        unsafe {
            ffi::hwc2_compat_layer_set_composition_type(layer, ffi::HWC2_COMPOSITION_CLIENT);
            ffi::hwc2_compat_layer_set_blend_mode(layer, ffi::HWC2_BLEND_MODE_NONE);
            ffi::hwc2_compat_layer_set_source_crop(layer, 0.0, 0.0, width as f32, height as f32);
            ffi::hwc2_compat_layer_set_display_frame(layer, 0, 0, width, height);
            ffi::hwc2_compat_layer_set_visible_region(layer, 0, 0, width, height);
        }
        self.layer = layer;
    }

    pub fn destroy_client_layer(&mut self) {
        if !self.layer.is_null() {
            unsafe { ffi::hwc2_compat_display_destroy_layer(self.display, self.layer) };
            self.layer = std::ptr::null_mut();
        }
    }
}

impl ComposerHal2 for HybrisHwc2 {
    fn active_config(&mut self) -> Option<DisplayAttributes> {
        let config = unsafe { ffi::hwc2_compat_display_get_active_config(self.display) };
        if config.is_null() {
            return None;
        }
        let attrs = unsafe {
            DisplayAttributes {
                width: (*config).width,
                height: (*config).height,
                vsync_period: Duration::from_nanos((*config).vsync_period.max(0) as u64),
                dpi_x: (*config).dpi_x,
                dpi_y: (*config).dpi_y,
            }
        };
        unsafe { libc::free(config as *mut c_void) };
        Some(attrs)
    }

    fn validate(&mut self) -> ValidateOutcome {
        let mut num_types = 0;
        let mut num_requests = 0;
        let status = unsafe {
            ffi::hwc2_compat_display_validate(self.display, &mut num_types, &mut num_requests)
        };
        ValidateOutcome {
            status,
            has_changes: status == ffi::HWC2_ERROR_HAS_CHANGES,
            num_types,
            num_requests,
        }
    }

    fn accept_changes(&mut self) -> Result<(), i32> {
        let status = unsafe { ffi::hwc2_compat_display_accept_changes(self.display) };
        if status != ffi::HWC2_ERROR_NONE {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn set_client_target(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        acquire: Option<Fence>,
    ) -> Result<(), i32> {
        let fd = acquire.map(Fence::into_raw).unwrap_or(-1);
        let status = unsafe {
            ffi::hwc2_compat_display_set_client_target(
                self.display,
                slot,
                buffer.as_ptr() as *mut ffi::ANativeWindowBuffer,
                fd,
                ffi::HAL_DATASPACE_UNKNOWN,
            )
        };
        if status != ffi::HWC2_ERROR_NONE {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn present(&mut self) -> (Result<(), i32>, Option<Fence>) {
        let mut fence_fd: i32 = -1;
        let status = unsafe { ffi::hwc2_compat_display_present(self.display, &mut fence_fd) };
        let result = if status != ffi::HWC2_ERROR_NONE {
            Err(status)
        } else {
            Ok(())
        };
        (result, Fence::from_raw(fence_fd))
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), i32> {
        let raw = match mode {
            PowerMode::Off => ffi::HWC2_POWER_MODE_OFF,
            PowerMode::On => ffi::HWC2_POWER_MODE_ON,
        };
        let status = unsafe { ffi::hwc2_compat_display_set_power_mode(self.display, raw) };
        if status != ffi::HWC2_ERROR_NONE {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<(), i32> {
        let raw = if enabled {
            ffi::HWC2_VSYNC_ENABLE
        } else {
            ffi::HWC2_VSYNC_DISABLE
        };
        let status = unsafe { ffi::hwc2_compat_display_set_vsync_enabled(self.display, raw) };
        if status != ffi::HWC2_ERROR_NONE {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn ack_hotplug(&mut self, display: u64, connected: bool) {
        unsafe { ffi::hwc2_compat_device_on_hotplug(self.device, display, connected) };
    }
}

impl Drop for HybrisHwc2 {
    fn drop(&mut self) {
        self.destroy_client_layer();
        unsafe {
            if !self.display.is_null() {
                libc::free(self.display as *mut c_void);
            }
            // Some adaptations crash when the composer is closed; the
            // `no-close-hwc` workaround leaves it open.
            if self.close_device && !self.device.is_null() {
                libc::free(self.device as *mut c_void);
            }
        }
    }
}

// === factory ===

/// The opened composer device, already version-dispatched.
pub enum ComposerDevice {
    V1 {
        device: HybrisHwc1,
        version: HalVersion,
        num_displays: usize,
    },
    V2(HybrisHwc2),
}

/// Open the hardware composer module and wrap the device for whatever
/// protocol generation it speaks. Failure here is not recoverable; there
/// is no display without the composer.
pub fn open_composer(relay: Arc<EventRelay>, close_device: bool) -> crate::Result<ComposerDevice> {
    let mut module: *const ffi::HwModule = std::ptr::null();
    let status =
        unsafe { ffi::hw_get_module(ffi::HWC_HARDWARE_MODULE_ID.as_ptr() as *const _, &mut module) };
    if status != 0 || module.is_null() {
        return Err(Error::HalInit(format!("hw_get_module returned {status}")));
    }
    unsafe {
        info!(
            "composer module {:?} api {:#x}",
            std::ffi::CStr::from_ptr((*module).id),
            (*module).module_api_version
        );
    }

    let open = unsafe {
        (*(*module).methods)
            .open
            .ok_or_else(|| Error::HalInit("module has no open entry".into()))?
    };
    let mut device: *mut ffi::HwDevice = std::ptr::null_mut();
    let status = unsafe {
        open(
            module,
            ffi::HWC_HARDWARE_COMPOSER.as_ptr() as *const _,
            &mut device,
        )
    };
    if status != 0 || device.is_null() {
        return Err(Error::HalInit(format!("device open returned {status}")));
    }

    let raw_version = unsafe { (*device).version };
    let version = interpreted_version(raw_version);
    info!("composer device version {raw_version:#x} (interpreted {version:#x})");

    match HalVersion::from_device_version(raw_version) {
        Some(HalVersion::V20) => {
            // The 2.0 protocol goes through the compatibility layer, not
            // the raw device table.
            unsafe {
                if let Some(close) = (*device).close {
                    close(device);
                }
            }
            Ok(ComposerDevice::V2(HybrisHwc2::open(relay, close_device)?))
        }
        Some(generation) => {
            let device = HybrisHwc1::new(device as *mut ffi::HwcComposerDevice1, relay);
            let num_displays = match generation {
                HalVersion::V0 | HalVersion::V10 => 1,
                _ => ffi::HWC_NUM_DISPLAY_TYPES,
            };
            Ok(ComposerDevice::V1 {
                device,
                version: generation,
                num_displays,
            })
        }
        None => Err(Error::UnsupportedVersion(version)),
    }
}
