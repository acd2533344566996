//! Environment-variable configuration
//!
//! All knobs are read once at startup. Unset or unparsable values fall
//! back to defaults; out-of-range values are clamped.
//!
//! - `HWC_BRIDGE_BUFFER_COUNT` — native window buffer count, 2..=8 (default 3)
//! - `HWC_BRIDGE_IDLE_TIME` — update batching delay in ms, 5..=100 (default 5)
//! - `HWC_BRIDGE_VSYNC_TIMEOUT` — grace period in ms before a missing
//!   vsync is worked around (default 50)
//! - `HWC_BRIDGE_SYNC_BEFORE_SET` — wait on the acquire fence on the CPU
//!   before handing the buffer to the compositor (driver workaround)
//! - `HWC_BRIDGE_FORCE_GPU` — never request overlay composition
//! - `HWC_BRIDGE_NO_RETIRE_WAIT` — close retire fences without waiting
//! - `HWC_BRIDGE_WORKAROUNDS` — comma-separated driver quirk toggles
//!   (e.g. `no-close-hwc`)
//! - `HWC_BRIDGE_WIDTH` / `HWC_BRIDGE_HEIGHT` — screen size override (px)
//! - `HWC_BRIDGE_PHYSICAL_WIDTH` / `HWC_BRIDGE_PHYSICAL_HEIGHT` —
//!   physical size override (mm)
//! - `HWC_BRIDGE_DUMP_LAYERS` — log the layer list every frame

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub buffer_count: u32,
    pub idle_time: Duration,
    pub vsync_grace: Duration,
    pub sync_before_set: bool,
    pub force_gpu: bool,
    pub wait_retire: bool,
    pub workarounds: Vec<String>,
    pub size_override: Option<(i32, i32)>,
    pub physical_override: Option<(f32, f32)>,
    pub dump_layers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            idle_time: Duration::from_millis(5),
            vsync_grace: Duration::from_millis(50),
            sync_before_set: false,
            force_gpu: false,
            wait_retire: true,
            workarounds: Vec::new(),
            size_override: None,
            physical_override: None,
            dump_layers: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let parse_u64 = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let parse_i32 = |name: &str| lookup(name).and_then(|v| v.trim().parse::<i32>().ok());
        let parse_f32 = |name: &str| lookup(name).and_then(|v| v.trim().parse::<f32>().ok());
        let flag = |name: &str| {
            lookup(name)
                .map(|v| !matches!(v.trim(), "" | "0"))
                .unwrap_or(false)
        };

        let buffer_count = parse_u64("HWC_BRIDGE_BUFFER_COUNT")
            .map(|n| n.clamp(2, 8) as u32)
            .unwrap_or(defaults.buffer_count);

        let idle_time = parse_u64("HWC_BRIDGE_IDLE_TIME")
            .map(|ms| Duration::from_millis(ms.clamp(5, 100)))
            .unwrap_or(defaults.idle_time);

        let vsync_grace = parse_u64("HWC_BRIDGE_VSYNC_TIMEOUT")
            .map(Duration::from_millis)
            .unwrap_or(defaults.vsync_grace);

        let workarounds = lookup("HWC_BRIDGE_WORKAROUNDS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let size_override = match (
            parse_i32("HWC_BRIDGE_WIDTH"),
            parse_i32("HWC_BRIDGE_HEIGHT"),
        ) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };

        let physical_override = match (
            parse_f32("HWC_BRIDGE_PHYSICAL_WIDTH"),
            parse_f32("HWC_BRIDGE_PHYSICAL_HEIGHT"),
        ) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((w, h)),
            _ => None,
        };

        Self {
            buffer_count,
            idle_time,
            vsync_grace,
            sync_before_set: flag("HWC_BRIDGE_SYNC_BEFORE_SET"),
            force_gpu: flag("HWC_BRIDGE_FORCE_GPU"),
            wait_retire: !flag("HWC_BRIDGE_NO_RETIRE_WAIT"),
            workarounds,
            size_override,
            physical_override,
            dump_layers: flag("HWC_BRIDGE_DUMP_LAYERS"),
        }
    }

    pub fn has_workaround(&self, name: &str) -> bool {
        self.workarounds.iter().any(|w| w == name)
    }
}
