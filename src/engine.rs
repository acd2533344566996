//! Composition passes
//!
//! Turns one rendered buffer (plus any overlay planes the embedder
//! registered) into a committed frame, through the HAL's two-phase
//! prepare/set protocol. The engine owns the display-content descriptors
//! and is only ever driven from the composition thread; the renderer talks
//! to it through the swap slot.
//!
//! Overlay negotiation is a greedy backward elimination: request the
//! maximal plane count, and while the device demotes any requested overlay
//! to GPU composition, drop the last plane and re-run prepare. Plane
//! counts are tiny, so an optimal placement search would buy nothing
//! against an opaque accept/reject decision.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::Config;
use crate::fence::{Fence, FencePool};
use crate::hal::{ComposerHal, HalCapabilities, PRIMARY_DISPLAY};
use crate::layer::{BlendMode, BufferHandle, CompositionType, DisplayContents, Rect, Transform};
use crate::power::PowerController;
use crate::swapchain::FrameBuffer;

/// An extra surface the embedder wants scanned out by display hardware
/// instead of being pre-blended by the GPU.
#[derive(Debug)]
pub struct OverlayPlane {
    pub buffer: BufferHandle,
    pub source: Rect,
    pub frame: Rect,
    pub blending: BlendMode,
    pub acquire: Option<Fence>,
}

/// What one composition pass produced.
#[derive(Debug, Default)]
pub struct PresentOutcome {
    /// Signals when the compositor is done reading the rendered buffer.
    pub release: Option<Fence>,
    /// Release fences for the overlay planes that made it to hardware,
    /// in plane order.
    pub overlay_releases: Vec<Option<Fence>>,
    /// How many requested overlay planes the device accepted.
    pub accepted_overlays: usize,
    /// False when the frame was dropped (device refused prepare or set).
    pub committed: bool,
}

pub struct CompositionEngine<H> {
    hal: Arc<Mutex<H>>,
    power: PowerController<H>,
    contents: Vec<DisplayContents>,
    overlays: Vec<OverlayPlane>,
    surface_size: (i32, i32),
    caps: HalCapabilities,
    num_displays: usize,
    force_gpu: bool,
    wait_retire: bool,
    dump_layers: bool,
}

impl<H: ComposerHal> CompositionEngine<H> {
    pub fn new(
        hal: Arc<Mutex<H>>,
        power: PowerController<H>,
        num_displays: usize,
        surface_size: (i32, i32),
        config: &Config,
    ) -> Self {
        let caps = hal.lock().unwrap().capabilities();
        let contents = (0..num_displays).map(|_| DisplayContents::new(2)).collect();
        Self {
            hal,
            power,
            contents,
            overlays: Vec::new(),
            surface_size,
            caps,
            num_displays,
            force_gpu: config.force_gpu,
            wait_retire: config.wait_retire,
            dump_layers: config.dump_layers,
        }
    }

    /// Replace the set of requested overlay planes for subsequent frames.
    pub fn set_overlay_planes(&mut self, planes: Vec<OverlayPlane>) {
        // Fences of planes never submitted are closed by the drop.
        self.overlays = planes;
    }

    pub fn surface_size(&self) -> (i32, i32) {
        self.surface_size
    }

    /// Run one full composition pass.
    pub fn present_frame(&mut self, frame: FrameBuffer) -> PresentOutcome {
        let mut pool = FencePool::new(self.wait_retire);
        let mut outcome = PresentOutcome::default();

        let mut planes = if self.force_gpu { 0 } else { self.overlays.len() };

        self.relayout_all(planes);
        self.attach_target(&frame);

        // Retire fences of the previous cycle are owed a wait and close
        // before the device writes new ones.
        for contents in &mut self.contents {
            pool.consume(&mut contents.retire);
        }

        // Prepare, shrinking the overlay set until the device accepts it.
        loop {
            let result = self.hal.lock().unwrap().prepare(&mut self.contents);
            if let Err(code) = result {
                warn!("prepare returned {code}, dropping frame");
                self.reclaim_fences(&mut pool);
                return outcome;
            }
            if planes == 0 || self.rejected_overlays(planes) == 0 {
                break;
            }
            // The device refused at least one plane; retire the last one to
            // the GPU path and renegotiate with a rebuilt layer list.
            debug!("overlay rejected, retrying with {} plane(s)", planes - 1);
            planes -= 1;
            self.relayout_all(planes);
            self.attach_target(&frame);
        }
        outcome.accepted_overlays = planes;

        // Only the planes that survived negotiation hand their acquire
        // fence to the device; the dropped ones' fences die with the plane
        // (or were already consumed by a previous pass).
        self.attach_planes(planes);

        if self.dump_layers {
            self.dump_contents();
        }

        let result = self.hal.lock().unwrap().commit(&mut self.contents);
        if let Err(code) = result {
            warn!("set returned {code}, dropping frame");
            self.reclaim_fences(&mut pool);
            return outcome;
        }
        outcome.committed = true;

        self.collect_releases(planes, &mut pool, &mut outcome);

        for contents in &mut self.contents {
            contents.geometry_changed = false;
        }

        // Pool drop waits on and closes everything consumed above; the
        // frame's own acquire fence closes when `frame` goes out of scope,
        // after every display took its duplicate.
        outcome
    }

    /// Lay out every display's layer list for `planes` overlay planes.
    /// Lists are rebuilt whenever the layer count changes.
    fn relayout_all(&mut self, planes: usize) {
        let (width, height) = self.surface_size;
        let source = Rect::of_size(width, height);
        let sub_pixel = self.caps.sub_pixel_crop;

        for display in 0..self.num_displays {
            let attrs = self.hal.lock().unwrap().display_attributes(display);
            let dest = attrs
                .map(|a| Rect::of_size(a.width, a.height))
                .unwrap_or(source);

            let wanted = if display == PRIMARY_DISPLAY { planes + 2 } else { 2 };
            let contents = &mut self.contents[display];
            if contents.num_layers() != wanted {
                contents.rebuild(wanted);
            }

            let base = contents.layer_mut(0);
            base.reset();
            base.composition = CompositionType::Gpu;
            base.set_source_crop(source, sub_pixel);
            base.display_frame = dest;

            if display == PRIMARY_DISPLAY {
                for (index, plane) in self.overlays.iter().take(planes).enumerate() {
                    let layer = contents.layer_mut(index + 1);
                    layer.reset();
                    layer.composition = CompositionType::Overlay;
                    layer.blending = plane.blending;
                    layer.buffer = Some(plane.buffer);
                    layer.set_source_crop(plane.source, sub_pixel);
                    layer.display_frame = plane.frame;
                }
            }

            let target_index = contents.num_layers() - 1;
            let target = contents.layer_mut(target_index);
            target.reset();
            target.composition = CompositionType::GpuTarget;
            target.transform = if dest.width() > dest.height() {
                Transform::Rot270
            } else {
                Transform::None
            };
            target.set_source_crop(source, sub_pixel);
            target.display_frame = dest;

            contents.geometry_changed = true;
        }
    }

    /// Point every display's target layer at the rendered buffer. Each
    /// powered display gets its own duplicate of the acquire fence; a
    /// blanked display must not hold the buffer back.
    fn attach_target(&mut self, frame: &FrameBuffer) {
        for display in 0..self.num_displays {
            let unblanked = self.power.unblanked(display);
            let contents = &mut self.contents[display];
            let target_index = contents.num_layers() - 1;
            let target = contents.layer_mut(target_index);
            target.buffer = Some(frame.buffer);
            target.acquire = if unblanked {
                frame.acquire.as_ref().and_then(Fence::try_clone)
            } else {
                None
            };
            target.release = None;
        }
    }

    /// Move the accepted planes' acquire fences into their layers.
    fn attach_planes(&mut self, planes: usize) {
        for (index, plane) in self.overlays.iter_mut().take(planes).enumerate() {
            let layer = self.contents[PRIMARY_DISPLAY].layer_mut(index + 1);
            layer.acquire = plane.acquire.take();
        }
    }

    /// Overlay layers on the primary display the device refused.
    fn rejected_overlays(&self, planes: usize) -> usize {
        let contents = &self.contents[PRIMARY_DISPLAY];
        (1..=planes)
            .filter(|&i| contents.layer(i).composition != CompositionType::Overlay)
            .count()
    }

    /// Route the release fences of a committed frame: the target layer of
    /// the first display goes back to the producer, overlay fences go to
    /// their planes, everything else is closed.
    fn collect_releases(
        &mut self,
        planes: usize,
        pool: &mut FencePool,
        outcome: &mut PresentOutcome,
    ) {
        for display in 0..self.num_displays {
            let contents = &mut self.contents[display];
            let target_index = contents.num_layers() - 1;

            let base = contents.layer_mut(0);
            if base.release.is_some() {
                warn!("device set a release fence on a GPU-composited layer");
                pool.consume(&mut base.release);
            }

            if display == PRIMARY_DISPLAY {
                for index in 0..planes {
                    let layer = contents.layer_mut(index + 1);
                    outcome.overlay_releases.push(layer.release.take());
                }
            }

            let target = contents.layer_mut(target_index);
            if outcome.release.is_none() {
                outcome.release = target.release.take();
            } else {
                pool.consume(&mut target.release);
            }
        }
    }

    /// Drop-frame path: make sure no fence stays stranded in a layer.
    fn reclaim_fences(&mut self, pool: &mut FencePool) {
        for contents in &mut self.contents {
            pool.consume(&mut contents.retire);
            for layer in contents.layers_mut() {
                pool.consume(&mut layer.acquire);
                pool.consume(&mut layer.release);
            }
        }
    }

    fn dump_contents(&self) {
        for (display_index, contents) in self.contents.iter().enumerate() {
            debug!(
                "display {}: {} layer(s), geometry_changed={}",
                display_index,
                contents.num_layers(),
                contents.geometry_changed
            );
            for (index, layer) in contents.layers().enumerate() {
                debug!(
                    "  layer {}: type={}, blending={}, crop={:?}, frame={:?}, acquire={:?}, release={:?}",
                    index,
                    layer.composition,
                    layer.blending,
                    layer.source_crop,
                    layer.display_frame,
                    layer.acquire.as_ref().map(Fence::as_raw),
                    layer.release.as_ref().map(Fence::as_raw),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhal::{test_attributes, FakeComposer};

    fn engine_with(fake: &FakeComposer, num_displays: usize) -> CompositionEngine<FakeComposer> {
        let hal = Arc::new(Mutex::new(fake.clone()));
        let power = PowerController::new(hal.clone(), num_displays);
        power.wake();
        CompositionEngine::new(hal, power, num_displays, (1080, 1920), &Config::default())
    }

    fn plain_frame(id: usize) -> FrameBuffer {
        FrameBuffer {
            buffer: BufferHandle(id),
            acquire: None,
        }
    }

    fn overlay_plane(id: usize) -> OverlayPlane {
        OverlayPlane {
            buffer: BufferHandle(id),
            source: Rect::of_size(256, 256),
            frame: Rect {
                left: 100,
                top: 100,
                right: 356,
                bottom: 356,
            },
            blending: BlendMode::Premultiplied,
            acquire: None,
        }
    }

    #[test]
    fn basic_pass_commits_and_returns_release_fence() {
        let fake = FakeComposer::new(0);
        let mut engine = engine_with(&fake, 1);
        let outcome = engine.present_frame(plain_frame(1));
        assert!(outcome.committed);
        assert!(outcome.release.is_some());
        assert_eq!(fake.state().prepare_calls, 1);
        assert_eq!(fake.state().commit_calls, 1);
    }

    #[test]
    fn negotiation_converges_to_device_capacity() {
        let fake = FakeComposer::new(2);
        let mut engine = engine_with(&fake, 1);
        engine.set_overlay_planes((0..5).map(|i| overlay_plane(100 + i)).collect());

        let outcome = engine.present_frame(plain_frame(1));
        assert!(outcome.committed);
        assert_eq!(outcome.accepted_overlays, 2);
        assert_eq!(outcome.overlay_releases.len(), 2);
        // One initial prepare plus one retry per dropped plane.
        assert_eq!(fake.state().prepare_calls, 1 + 3);
    }

    #[test]
    fn negotiation_with_no_overlay_budget_falls_back_to_gpu() {
        let fake = FakeComposer::new(0);
        let mut engine = engine_with(&fake, 1);
        engine.set_overlay_planes((0..3).map(|i| overlay_plane(100 + i)).collect());

        let outcome = engine.present_frame(plain_frame(1));
        assert!(outcome.committed);
        assert_eq!(outcome.accepted_overlays, 0);
        assert_eq!(fake.state().prepare_calls, 1 + 3);
    }

    #[test]
    fn fences_balance_over_many_passes() {
        let fake = FakeComposer::new(1);
        let mut engine = engine_with(&fake, 2);
        engine.set_overlay_planes(vec![overlay_plane(50)]);

        for frame in 0..5 {
            let outcome = engine.present_frame(plain_frame(frame));
            assert!(outcome.committed);
            // The producer closes its release fences by dropping them.
            drop(outcome);
        }
        drop(engine);
        fake.assert_all_fences_closed();
    }

    #[test]
    fn acquire_fence_is_duplicated_per_display_and_closed() {
        let fake = FakeComposer::new(0);
        fake.state().attributes.insert(1, test_attributes(800, 480));
        let mut engine = engine_with(&fake, 2);

        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let mut reader = unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(fds[0])
        };
        let frame = FrameBuffer {
            buffer: BufferHandle(1),
            acquire: Fence::from_raw(fds[1]),
        };
        let outcome = engine.present_frame(frame);
        assert!(outcome.committed);
        drop(outcome);
        drop(engine);

        use std::io::Read;
        let mut buf = [0u8; 1];
        // Original and every duplicate closed: the read end reports EOF.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        fake.assert_all_fences_closed();
    }

    #[test]
    fn prepare_failure_drops_frame_without_leaking() {
        let fake = FakeComposer::new(0);
        fake.state().prepare_result = -5;
        let mut engine = engine_with(&fake, 1);

        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let mut reader = unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(fds[0])
        };
        let frame = FrameBuffer {
            buffer: BufferHandle(1),
            acquire: Fence::from_raw(fds[1]),
        };
        let outcome = engine.present_frame(frame);
        assert!(!outcome.committed);
        assert!(outcome.release.is_none());
        assert_eq!(fake.state().commit_calls, 0);

        use std::io::Read;
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        // The next frame starts fresh.
        fake.state().prepare_result = 0;
        assert!(engine.present_frame(plain_frame(2)).committed);
    }

    #[test]
    fn set_failure_drops_frame() {
        let fake = FakeComposer::new(0);
        fake.state().commit_result = -7;
        let mut engine = engine_with(&fake, 1);
        let outcome = engine.present_frame(plain_frame(1));
        assert!(!outcome.committed);
        assert!(outcome.release.is_none());
    }

    #[test]
    fn layout_round_trips_display_frame() {
        let fake = FakeComposer::new(0);
        fake.state().attributes.insert(0, test_attributes(800, 480));
        let mut engine = engine_with(&fake, 1);
        engine.present_frame(plain_frame(1));

        let expected = Rect {
            left: 0,
            top: 0,
            right: 800,
            bottom: 480,
        };
        let contents = &engine.contents[0];
        let target = contents.layer(contents.num_layers() - 1);
        assert_eq!(target.display_frame, expected);
        // Landscape panel: the target is rotated.
        assert_eq!(target.transform, Transform::Rot270);
    }

    #[test]
    fn sub_pixel_capability_populates_float_crops() {
        let fake = FakeComposer::new(0);
        fake.state().sub_pixel = true;
        let mut engine = engine_with(&fake, 1);
        engine.present_frame(plain_frame(1));

        let contents = &engine.contents[0];
        for layer in contents.layers() {
            let f = layer.source_crop_f.expect("float crop missing");
            assert_eq!(f.left, layer.source_crop.left as f32);
            assert_eq!(f.right, layer.source_crop.right as f32);
        }
    }

    #[test]
    fn blanked_display_gets_no_acquire_duplicate() {
        let fake = FakeComposer::new(0);
        let hal = Arc::new(Mutex::new(fake.clone()));
        let power = PowerController::new(hal.clone(), 1);
        // Never woken: the display stays blanked.
        let mut engine =
            CompositionEngine::new(hal, power, 1, (1080, 1920), &Config::default());

        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let mut reader = unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(fds[0])
        };
        let frame = FrameBuffer {
            buffer: BufferHandle(1),
            acquire: Fence::from_raw(fds[1]),
        };
        engine.present_frame(frame);

        use std::io::Read;
        let mut buf = [0u8; 1];
        // No duplicate was made, and the original is closed right away.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
