//! Layer and display-content descriptors
//!
//! One [`DisplayContents`] per physical display describes everything the
//! hardware compositor must combine into a frame: an ordered list of
//! [`Layer`]s plus a retire-fence slot. The descriptors are allocated once
//! per window, mutated every frame on the composition thread, and rebuilt
//! (never resized in place) when the layer count changes.

use std::fmt;

use crate::fence::Fence;

/// Integer rectangle, HAL edge convention (right/bottom exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn of_size(width: i32, height: i32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Sub-pixel rectangle for HALs with the floating source-crop extension.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl From<Rect> for FRect {
    fn from(r: Rect) -> Self {
        Self {
            left: r.left as f32,
            top: r.top as f32,
            right: r.right as f32,
            bottom: r.bottom as f32,
        }
    }
}

/// How a layer gets composited into the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionType {
    /// Content the GPU composites into the target surface.
    #[default]
    Gpu,
    /// Display hardware scans the buffer out directly.
    Overlay,
    /// The surface the GPU composition lands in.
    GpuTarget,
}

impl fmt::Display for CompositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gpu => "GPU",
            Self::Overlay => "OVERLAY",
            Self::GpuTarget => "GPU TARGET",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    None,
    Premultiplied,
    Coverage,
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Premultiplied => "PREMULT",
            Self::Coverage => "COVERAGE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    None,
    Rot90,
    Rot180,
    Rot270,
}

/// Opaque buffer handle passed through from the producer to the HAL.
///
/// Stored as an address so the core stays pointer-free; the FFI layer casts
/// at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub usize);

impl BufferHandle {
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

/// One composited surface within a display's layer list.
#[derive(Debug, Default)]
pub struct Layer {
    pub composition: CompositionType,
    pub hints: u32,
    pub flags: u32,
    pub skip: bool,
    pub buffer: Option<BufferHandle>,
    pub transform: Transform,
    pub blending: BlendMode,
    pub source_crop: Rect,
    /// Populated alongside `source_crop` when the HAL supports sub-pixel
    /// crops; some drivers ignore the integer form once the extension is
    /// present, so both must agree.
    pub source_crop_f: Option<FRect>,
    pub display_frame: Rect,
    pub acquire: Option<Fence>,
    pub release: Option<Fence>,
}

impl Layer {
    /// Clear everything a previous frame may have left behind. Fence slots
    /// must not carry stale values across frames; any leftovers are closed
    /// here.
    pub fn reset(&mut self) {
        self.hints = 0;
        self.flags = 0;
        self.skip = false;
        self.buffer = None;
        self.transform = Transform::None;
        self.blending = BlendMode::None;
        self.acquire = None;
        self.release = None;
    }

    /// Set both crop forms consistently, the float one only when the HAL
    /// has the sub-pixel extension.
    pub fn set_source_crop(&mut self, crop: Rect, sub_pixel: bool) {
        self.source_crop = crop;
        self.source_crop_f = sub_pixel.then(|| FRect::from(crop));
    }
}

/// Layer list for one physical display.
#[derive(Debug, Default)]
pub struct DisplayContents {
    layers: Vec<Layer>,
    pub retire: Option<Fence>,
    pub geometry_changed: bool,
}

impl DisplayContents {
    pub fn new(num_layers: usize) -> Self {
        let mut contents = Self {
            layers: Vec::new(),
            retire: None,
            geometry_changed: true,
        };
        contents.rebuild(num_layers);
        contents
    }

    /// Replace the layer array with a freshly allocated one of `num_layers`
    /// entries. Changing the layer count always goes through here.
    pub fn rebuild(&mut self, num_layers: usize) {
        self.layers = (0..num_layers).map(|_| Layer::default()).collect();
        self.geometry_changed = true;
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> &Layer {
        &self.layers[index]
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut Layer {
        &mut self.layers[index]
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_frame_round_trips() {
        let mut contents = DisplayContents::new(2);
        let frame = Rect {
            left: 0,
            top: 0,
            right: 800,
            bottom: 480,
        };
        contents.layer_mut(1).display_frame = frame;
        assert_eq!(contents.layer(1).display_frame, frame);
        assert_eq!(contents.layer(1).display_frame.width(), 800);
        assert_eq!(contents.layer(1).display_frame.height(), 480);
    }

    #[test]
    fn sub_pixel_mode_populates_both_crops() {
        let mut layer = Layer::default();
        let crop = Rect::of_size(1080, 1920);

        layer.set_source_crop(crop, false);
        assert_eq!(layer.source_crop, crop);
        assert!(layer.source_crop_f.is_none());

        layer.set_source_crop(crop, true);
        let f = layer.source_crop_f.unwrap();
        assert_eq!(f, FRect::from(crop));
        assert_eq!(f.right, 1080.0);
        assert_eq!(f.bottom, 1920.0);
    }

    #[test]
    fn rebuild_replaces_layer_array() {
        let mut contents = DisplayContents::new(2);
        contents.geometry_changed = false;
        contents.rebuild(4);
        assert_eq!(contents.num_layers(), 4);
        assert!(contents.geometry_changed);
    }
}
