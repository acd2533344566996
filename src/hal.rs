//! Hardware composer HAL seams
//!
//! The versioned backends drive the HAL through these traits instead of
//! raw device pointers, so the state machines can run against a fake
//! composer in tests. The real implementations live behind the `hybris`
//! feature.

use std::time::Duration;

use crate::fence::Fence;
use crate::layer::{BufferHandle, DisplayContents};

/// Index of the built-in panel.
pub const PRIMARY_DISPLAY: usize = 0;
/// Index of a hotpluggable external display.
pub const EXTERNAL_DISPLAY: usize = 1;
/// Size of per-display state arrays (primary, external, virtual).
pub const MAX_DISPLAYS: usize = 3;

/// Display geometry and timing, queried at startup and on hotplug.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayAttributes {
    pub width: i32,
    pub height: i32,
    pub vsync_period: Duration,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

impl DisplayAttributes {
    /// Refresh rate in Hz, clamped to something a sane panel reports.
    pub fn refresh_rate(&self) -> f32 {
        let period_ns = self.vsync_period.as_nanos() as f32;
        if period_ns <= 0.0 {
            return 60.0;
        }
        let hz = 1_000_000_000.0 / period_ns;
        if hz > 0.0 && hz <= 1000.0 {
            hz
        } else {
            60.0
        }
    }

    /// Physical size in millimetres derived from the DPI, if plausible.
    pub fn physical_size_mm(&self) -> Option<(f32, f32)> {
        if self.dpi_x <= 0.0 || self.dpi_y <= 0.0 || self.width <= 0 || self.height <= 0 {
            return None;
        }
        Some((
            self.width as f32 * 25.4 / self.dpi_x,
            self.height as f32 * 25.4 / self.dpi_y,
        ))
    }
}

/// What the device advertises beyond the baseline protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalCapabilities {
    /// Layers carry a floating-point source crop in addition to the
    /// integer one.
    pub sub_pixel_crop: bool,
}

/// Asynchronous events delivered from HAL-owned threads.
///
/// Handlers registered for these must only signal or enqueue; all state
/// mutation happens on the thread that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    Vsync { display: u64, timestamp_ns: i64 },
    Hotplug { display: u64, connected: bool, primary: bool },
    Refresh { display: u64 },
}

/// The prepare/set generation of the composer protocol (device versions
/// 1.0 through 1.5).
///
/// `prepare` may rewrite the composition type of any layer in place; the
/// caller re-inspects the list afterwards. `commit` consumes the acquire
/// fences and fills the retire and release fence slots. Non-zero statuses
/// carry the raw HAL error code; per the device contract they are not
/// recoverable mid-frame.
pub trait ComposerHal: Send {
    fn capabilities(&self) -> HalCapabilities {
        HalCapabilities::default()
    }

    fn prepare(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32>;

    fn commit(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32>;

    fn blank(&mut self, display: usize, blank: bool) -> Result<(), i32>;

    fn set_vsync_enabled(&mut self, display: usize, enabled: bool) -> Result<(), i32>;

    fn display_attributes(&mut self, display: usize) -> Option<DisplayAttributes>;

    /// Device-global vsync period, only meaningful before per-display
    /// attributes existed.
    fn vsync_period(&mut self) -> Option<Duration> {
        None
    }
}

/// Outcome of a validate call on the two-phase hwc2 protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOutcome {
    pub status: i32,
    pub has_changes: bool,
    pub num_types: u32,
    pub num_requests: u32,
}

impl ValidateOutcome {
    pub fn ok(&self) -> bool {
        self.status == 0 || self.has_changes
    }

    pub fn clean(&self) -> bool {
        self.num_types == 0 && self.num_requests == 0
    }
}

/// Display power states of the hwc2 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off,
    On,
}

/// The validate/present generation of the composer protocol (device
/// version 2.0), one primary display.
pub trait ComposerHal2: Send {
    fn active_config(&mut self) -> Option<DisplayAttributes>;

    fn validate(&mut self) -> ValidateOutcome;

    fn accept_changes(&mut self) -> Result<(), i32>;

    /// Hands the rendered buffer and its acquire fence to the compositor.
    fn set_client_target(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        acquire: Option<Fence>,
    ) -> Result<(), i32>;

    /// Commits the frame; on success the returned fence signals when the
    /// previous frame has retired from the display.
    fn present(&mut self) -> (Result<(), i32>, Option<Fence>);

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), i32>;

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<(), i32>;

    /// Acknowledge a hotplug event back to the device.
    fn ack_hotplug(&mut self, display: u64, connected: bool);
}

/// Device versions, normalized. Old adaptations encode the version in a
/// legacy 16-bit form with an implied header version of 1.
pub fn interpreted_version(raw: u32) -> u32 {
    if raw & 0xffff_0000 == 0 {
        (raw << 16) | 1
    } else {
        raw
    }
}

pub const DEVICE_API_VERSION_0_1: u32 = 0x0001_0001; // legacy 0x1 shifted
pub const DEVICE_API_VERSION_1_0: u32 = 0x0100_0001;
pub const DEVICE_API_VERSION_1_1: u32 = 0x0101_0001;
pub const DEVICE_API_VERSION_1_5: u32 = 0x0105_0001;
pub const DEVICE_API_VERSION_2_0: u32 = 0x0200_0001;

/// Which backend generation a device version maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalVersion {
    V0,
    V10,
    V11,
    V20,
}

impl HalVersion {
    pub fn from_device_version(raw: u32) -> Option<Self> {
        let version = interpreted_version(raw);
        match version {
            v if v < DEVICE_API_VERSION_1_0 => Some(Self::V0),
            DEVICE_API_VERSION_1_0 => Some(Self::V10),
            v if v >= DEVICE_API_VERSION_1_1 && v <= DEVICE_API_VERSION_1_5 => Some(Self::V11),
            DEVICE_API_VERSION_2_0 => Some(Self::V20),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_versions_are_shifted() {
        assert_eq!(interpreted_version(0x1), 0x0001_0001);
        assert_eq!(interpreted_version(0x0100_0001), 0x0100_0001);
    }

    #[test]
    fn version_selection() {
        assert_eq!(HalVersion::from_device_version(0x1), Some(HalVersion::V0));
        assert_eq!(HalVersion::from_device_version(0x2), Some(HalVersion::V0));
        assert_eq!(
            HalVersion::from_device_version(DEVICE_API_VERSION_1_0),
            Some(HalVersion::V10)
        );
        assert_eq!(
            HalVersion::from_device_version(DEVICE_API_VERSION_1_1),
            Some(HalVersion::V11)
        );
        assert_eq!(
            HalVersion::from_device_version(0x0103_0001),
            Some(HalVersion::V11)
        );
        assert_eq!(
            HalVersion::from_device_version(DEVICE_API_VERSION_2_0),
            Some(HalVersion::V20)
        );
        assert_eq!(HalVersion::from_device_version(0x0300_0001), None);
    }

    #[test]
    fn refresh_rate_falls_back_when_implausible() {
        let mut attrs = DisplayAttributes {
            width: 1080,
            height: 1920,
            vsync_period: Duration::from_nanos(16_666_667),
            dpi_x: 400.0,
            dpi_y: 400.0,
        };
        assert!((attrs.refresh_rate() - 60.0).abs() < 0.1);

        attrs.vsync_period = Duration::from_nanos(1);
        assert_eq!(attrs.refresh_rate(), 60.0);
    }

    #[test]
    fn physical_size_needs_plausible_dpi() {
        let attrs = DisplayAttributes {
            width: 1080,
            height: 1920,
            vsync_period: Duration::from_nanos(16_666_667),
            dpi_x: 0.0,
            dpi_y: 400.0,
        };
        assert!(attrs.physical_size_mm().is_none());
    }
}
