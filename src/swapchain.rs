//! Producer/consumer buffer handoff
//!
//! The renderer and the composition thread meet here. At most one buffer
//! is pending per display: a producer that finishes a second frame before
//! the compositor picked up the first blocks in [`SwapSlot::submit`]. That
//! blocking is the backpressure bounding how far the renderer can run
//! ahead of the display.
//!
//! Release fences flow the other way: once a commit returns, the
//! compositor records the buffer's release fence and the producer collects
//! it before reusing the buffer.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::error::Error;
use crate::fence::Fence;
use crate::layer::BufferHandle;
use crate::Result;

/// A rendered frame on its way to the compositor.
#[derive(Debug)]
pub struct FrameBuffer {
    pub buffer: BufferHandle,
    /// Signals when the buffer is safe to read.
    pub acquire: Option<Fence>,
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<FrameBuffer>,
    releases: HashMap<BufferHandle, Option<Fence>>,
    shut_down: bool,
}

/// Single-slot handoff between one producer and one consumer.
#[derive(Debug, Default)]
pub struct SwapSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl SwapSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for composition. Blocks while a previous frame is
    /// still pending.
    pub fn submit(&self, frame: FrameBuffer) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while state.pending.is_some() && !state.shut_down {
            state = self.cond.wait(state).unwrap();
        }
        if state.shut_down {
            return Err(Error::SurfaceClosed);
        }
        state.pending = Some(frame);
        self.cond.notify_all();
        Ok(())
    }

    /// Wait for the next frame. Returns `None` once the slot shuts down
    /// and no frame is left, so the consumer drains in-flight work before
    /// exiting.
    pub fn take(&self) -> Option<FrameBuffer> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(frame) = state.pending.take() {
                self.cond.notify_all();
                return Some(frame);
            }
            if state.shut_down {
                return None;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Record the release fence for a composited buffer.
    pub fn finish(&self, buffer: BufferHandle, release: Option<Fence>) {
        let mut state = self.state.lock().unwrap();
        if let Some(stale) = state.releases.insert(buffer, release) {
            // The producer never collected the previous cycle's fence;
            // dropping it closes the fd.
            drop(stale);
        }
        self.cond.notify_all();
    }

    /// Collect the release fence recorded for `buffer`, if composition of
    /// it has completed.
    pub fn collect_release(&self, buffer: BufferHandle) -> Option<Fence> {
        let mut state = self.state.lock().unwrap();
        state.releases.remove(&buffer).flatten()
    }

    /// Wake all waiters and refuse further submissions. In-flight frames
    /// remain takeable.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        debug!("swap slot shut down");
        self.cond.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(id: usize) -> FrameBuffer {
        FrameBuffer {
            buffer: BufferHandle(id),
            acquire: None,
        }
    }

    #[test]
    fn second_submit_blocks_until_first_is_consumed() {
        let slot = Arc::new(SwapSlot::new());
        slot.submit(frame(1)).unwrap();

        let second_done = Arc::new(AtomicBool::new(false));
        let handle = {
            let slot = slot.clone();
            let second_done = second_done.clone();
            std::thread::spawn(move || {
                slot.submit(frame(2)).unwrap();
                second_done.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(
            !second_done.load(Ordering::SeqCst),
            "second submit returned while first frame was still pending"
        );

        let first = slot.take().unwrap();
        assert_eq!(first.buffer, BufferHandle(1));

        handle.join().unwrap();
        assert!(second_done.load(Ordering::SeqCst));
        assert_eq!(slot.take().unwrap().buffer, BufferHandle(2));
    }

    #[test]
    fn submit_after_consume_does_not_block() {
        let slot = SwapSlot::new();
        slot.submit(frame(1)).unwrap();
        assert_eq!(slot.take().unwrap().buffer, BufferHandle(1));
        // Slot is free again; this must return immediately.
        slot.submit(frame(2)).unwrap();
    }

    #[test]
    fn shutdown_unblocks_producer_and_consumer() {
        let slot = Arc::new(SwapSlot::new());
        slot.submit(frame(1)).unwrap();

        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.submit(frame(2)))
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.shut_down();

        assert!(matches!(producer.join().unwrap(), Err(Error::SurfaceClosed)));
        // The in-flight frame is still drained before the consumer stops.
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn release_fences_are_collected_per_buffer() {
        let slot = SwapSlot::new();
        slot.finish(BufferHandle(7), None);
        assert!(slot.collect_release(BufferHandle(7)).is_none());

        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let _reader = unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(fds[0])
        };
        slot.finish(BufferHandle(9), Fence::from_raw(fds[1]));
        assert!(slot.collect_release(BufferHandle(9)).is_some());
        assert!(slot.collect_release(BufferHandle(9)).is_none());
    }
}
