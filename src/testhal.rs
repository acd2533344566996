//! Fake composer devices for tests
//!
//! Both fakes hand out real pipe file descriptors as fences and keep the
//! peer ends, so tests can prove every issued fence was closed exactly
//! once.

use std::collections::HashMap;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::fence::Fence;
use crate::hal::{
    ComposerHal, ComposerHal2, DisplayAttributes, HalCapabilities, PowerMode, ValidateOutcome,
};
use crate::layer::{BufferHandle, CompositionType, DisplayContents};

pub(crate) fn test_attributes(width: i32, height: i32) -> DisplayAttributes {
    DisplayAttributes {
        width,
        height,
        vsync_period: Duration::from_nanos(16_666_667),
        dpi_x: 400.0,
        dpi_y: 400.0,
    }
}

/// Creates a pipe and returns the read end as an already-signaled fence
/// (one byte is pre-written, so waits return immediately). The write end
/// is kept; once the fence and all its duplicates are closed, writing to
/// it fails with EPIPE, which is how closure is asserted.
fn issue_fence(peers: &mut Vec<OwnedFd>) -> Fence {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let byte = 1u8;
    assert_eq!(
        unsafe { libc::write(fds[1], &byte as *const u8 as *const _, 1) },
        1
    );
    peers.push(unsafe { OwnedFd::from_raw_fd(fds[1]) });
    Fence::from_raw(fds[0]).unwrap()
}

fn assert_all_closed(peers: &mut Vec<OwnedFd>) {
    let byte = 1u8;
    for peer in peers.iter() {
        let ret = unsafe { libc::write(peer.as_raw_fd(), &byte as *const u8 as *const _, 1) };
        let err = std::io::Error::last_os_error();
        assert!(
            ret == -1 && err.raw_os_error() == Some(libc::EPIPE),
            "an issued fence fd was never closed"
        );
    }
    peers.clear();
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub max_overlays: usize,
    pub sub_pixel: bool,
    pub prepare_calls: usize,
    pub commit_calls: usize,
    pub blank_calls: Vec<(usize, bool)>,
    pub vsync_calls: Vec<(usize, bool)>,
    pub blank_result: i32,
    pub prepare_result: i32,
    pub commit_result: i32,
    pub attributes: HashMap<usize, DisplayAttributes>,
    pub fence_peers: Vec<OwnedFd>,
}

/// Fake prepare/set-generation composer with shared, inspectable state.
#[derive(Clone, Default)]
pub(crate) struct FakeComposer {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeComposer {
    pub fn new(max_overlays: usize) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state();
            state.max_overlays = max_overlays;
            state.attributes.insert(0, test_attributes(1080, 1920));
        }
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }

    /// Panics unless every fence ever issued has been closed.
    pub fn assert_all_fences_closed(&self) {
        assert_all_closed(&mut self.state().fence_peers);
    }
}

impl ComposerHal for FakeComposer {
    fn capabilities(&self) -> HalCapabilities {
        HalCapabilities {
            sub_pixel_crop: self.state().sub_pixel,
        }
    }

    fn prepare(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32> {
        let mut state = self.state();
        state.prepare_calls += 1;
        if state.prepare_result != 0 {
            return Err(state.prepare_result);
        }
        // Accept at most `max_overlays` overlay layers per display; demote
        // the rest to GPU composition, as a constrained device would.
        for display in contents.iter_mut() {
            let mut budget = state.max_overlays;
            for layer in display.layers_mut() {
                if layer.composition == CompositionType::Overlay {
                    if budget > 0 {
                        budget -= 1;
                    } else {
                        layer.composition = CompositionType::Gpu;
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, contents: &mut [DisplayContents]) -> Result<(), i32> {
        let mut state = self.state();
        state.commit_calls += 1;
        if state.commit_result != 0 {
            return Err(state.commit_result);
        }
        for display in contents.iter_mut() {
            display.retire = {
                let fence = issue_fence(&mut state.fence_peers);
                Some(fence)
            };
            for layer in display.layers_mut() {
                // The device consumes acquire fences during set.
                layer.acquire = None;
                if layer.composition == CompositionType::GpuTarget
                    || layer.composition == CompositionType::Overlay
                {
                    layer.release = Some(issue_fence(&mut state.fence_peers));
                }
            }
        }
        Ok(())
    }

    fn blank(&mut self, display: usize, blank: bool) -> Result<(), i32> {
        let mut state = self.state();
        state.blank_calls.push((display, blank));
        if state.blank_result != 0 {
            Err(state.blank_result)
        } else {
            Ok(())
        }
    }

    fn set_vsync_enabled(&mut self, display: usize, enabled: bool) -> Result<(), i32> {
        self.state().vsync_calls.push((display, enabled));
        Ok(())
    }

    fn display_attributes(&mut self, display: usize) -> Option<DisplayAttributes> {
        self.state().attributes.get(&display).copied()
    }

    fn vsync_period(&mut self) -> Option<Duration> {
        Some(Duration::from_nanos(16_666_667))
    }
}

#[derive(Default)]
pub(crate) struct Fake2State {
    pub validate_outcome: ValidateOutcome,
    pub validate_calls: usize,
    pub accept_calls: usize,
    pub present_calls: usize,
    pub targets: Vec<BufferHandle>,
    pub power_calls: Vec<PowerMode>,
    pub vsync_calls: Vec<bool>,
    pub hotplug_acks: Vec<(u64, bool)>,
    pub fence_peers: Vec<OwnedFd>,
}

/// Fake validate/present-generation composer.
#[derive(Clone, Default)]
pub(crate) struct FakeComposer2 {
    inner: Arc<Mutex<Fake2State>>,
}

impl FakeComposer2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, Fake2State> {
        self.inner.lock().unwrap()
    }

    pub fn assert_all_fences_closed(&self) {
        assert_all_closed(&mut self.state().fence_peers);
    }
}

impl ComposerHal2 for FakeComposer2 {
    fn active_config(&mut self) -> Option<DisplayAttributes> {
        Some(test_attributes(1080, 1920))
    }

    fn validate(&mut self) -> ValidateOutcome {
        let mut state = self.state();
        state.validate_calls += 1;
        state.validate_outcome
    }

    fn accept_changes(&mut self) -> Result<(), i32> {
        self.state().accept_calls += 1;
        Ok(())
    }

    fn set_client_target(
        &mut self,
        _slot: u32,
        buffer: BufferHandle,
        acquire: Option<Fence>,
    ) -> Result<(), i32> {
        let mut state = self.state();
        state.targets.push(buffer);
        drop(acquire);
        Ok(())
    }

    fn present(&mut self) -> (Result<(), i32>, Option<Fence>) {
        let mut state = self.state();
        state.present_calls += 1;
        let fence = issue_fence(&mut state.fence_peers);
        (Ok(()), Some(fence))
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), i32> {
        self.state().power_calls.push(mode);
        Ok(())
    }

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<(), i32> {
        self.state().vsync_calls.push(enabled);
        Ok(())
    }

    fn ack_hotplug(&mut self, display: u64, connected: bool) {
        self.state().hotplug_acks.push((display, connected));
    }
}
