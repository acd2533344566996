//! Sync fence ownership
//!
//! The HAL communicates completion of asynchronous display operations
//! through sync fence file descriptors. Whoever is handed a fence owns it
//! until it is passed on to another HAL call or released. A fence must
//! never be waited on or closed twice, so the raw `-1`-or-fd integers of
//! the HAL surface are confined to the FFI boundary; everywhere else a
//! fence is a move-only [`Fence`] and an empty slot is `None`.

use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::{trace, warn};

/// Upper bound for any fence wait. A fence that has not signaled by then is
/// assumed stuck (broken driver); the descriptor is closed anyway.
pub const FENCE_WAIT_CAP: Duration = Duration::from_secs(3);

/// An owned sync fence file descriptor.
///
/// Closed exactly once, on drop. Moving the value is the only way to
/// transfer ownership, so double-close cannot be expressed.
#[derive(Debug)]
pub struct Fence(OwnedFd);

impl Fence {
    /// Take ownership of a raw fence fd as returned by a HAL call.
    ///
    /// Negative values are the HAL's "no fence" sentinel and map to `None`.
    pub fn from_raw(fd: RawFd) -> Option<Self> {
        if fd < 0 {
            None
        } else {
            // Safety: the HAL contract hands us ownership of the fd.
            Some(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
        }
    }

    /// Give the descriptor back to a HAL call that takes ownership.
    pub fn into_raw(self) -> RawFd {
        self.0.into_raw_fd()
    }

    /// Raw fd for calls that only borrow the fence.
    pub fn as_raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Duplicate the fence. Each copy is waited on and closed independently.
    pub fn try_clone(&self) -> Option<Self> {
        match self.0.try_clone() {
            Ok(fd) => Some(Self(fd)),
            Err(e) => {
                warn!("failed to dup fence fd {}: {}", self.as_raw(), e);
                None
            }
        }
    }

    /// Block until the fence signals, up to `timeout`.
    ///
    /// Returns whether the fence signaled. Failures are logged and treated
    /// as signaled-enough; the caller closes the descriptor regardless.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.as_raw(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret > 0 {
                return true;
            }
            if ret == 0 {
                warn!("fence fd {} not signaled within {:?}", self.as_raw(), timeout);
                return false;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            warn!("poll on fence fd {} failed: {}", self.as_raw(), err);
            return false;
        }
    }
}

/// Collects the fences produced during one composition pass and guarantees
/// each is waited on (optionally) and closed exactly once, in acquisition
/// order, on every exit path.
#[derive(Debug)]
pub struct FencePool {
    fences: Vec<Fence>,
    wait_before_close: bool,
}

impl FencePool {
    pub fn new(wait_before_close: bool) -> Self {
        Self {
            fences: Vec::new(),
            wait_before_close,
        }
    }

    /// Move the fence out of `slot` into the pool, leaving `None` behind.
    pub fn consume(&mut self, slot: &mut Option<Fence>) {
        if let Some(fence) = slot.take() {
            self.fences.push(fence);
        }
    }

    /// Number of fences the pool currently owes a close.
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

impl Drop for FencePool {
    fn drop(&mut self) {
        for fence in self.fences.drain(..) {
            trace!("retiring fence fd {}", fence.as_raw());
            if self.wait_before_close {
                fence.wait(FENCE_WAIT_CAP);
            }
            // Dropping the fence closes it.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::fd::FromRawFd;

    /// Returns (read end, write-end fd). The write end plays the fence: it
    /// "signals" when data is written, and closing it EOFs the read end.
    fn pipe_fence() -> (std::fs::File, RawFd) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let reader = unsafe { std::fs::File::from_raw_fd(fds[0]) };
        (reader, fds[1])
    }

    fn assert_closed(reader: &mut std::fs::File) {
        let mut buf = [0u8; 1];
        // EOF on the read end proves the write end (the fence) was closed.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn negative_fd_is_no_fence() {
        assert!(Fence::from_raw(-1).is_none());
    }

    #[test]
    fn drop_closes_fd() {
        let (mut reader, wfd) = pipe_fence();
        let fence = Fence::from_raw(wfd).unwrap();
        drop(fence);
        assert_closed(&mut reader);
    }

    #[test]
    fn into_raw_defuses_drop() {
        let (_reader, wfd) = pipe_fence();
        let fence = Fence::from_raw(wfd).unwrap();
        let raw = fence.into_raw();
        assert_eq!(raw, wfd);
        // We now own the fd again; close it manually.
        assert_eq!(unsafe { libc::close(raw) }, 0);
    }

    #[test]
    fn wait_returns_after_signal() {
        let (reader, wfd) = pipe_fence();
        let fence = Fence::from_raw(wfd).unwrap();
        // The fence fd is the write end of a pipe, which polls writable but
        // not readable; POLLIN on it never fires, so use the read end to
        // model an already-signaled fence instead.
        drop(fence);
        let rfd = {
            use std::os::fd::IntoRawFd;
            reader.into_raw_fd()
        };
        let fence = Fence::from_raw(rfd).unwrap();
        // Write end is closed, so POLLIN (via POLLHUP) fires immediately.
        assert!(fence.wait(Duration::from_millis(100)));
    }

    #[test]
    fn wait_times_out_on_silent_fence() {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let _writer = unsafe { std::fs::File::from_raw_fd(fds[1]) };
        let fence = Fence::from_raw(fds[0]).unwrap();
        assert!(!fence.wait(Duration::from_millis(10)));
    }

    #[test]
    fn pool_closes_every_consumed_fence_in_order() {
        let mut readers = Vec::new();
        let mut pool = FencePool::new(false);
        for _ in 0..4 {
            let (reader, wfd) = pipe_fence();
            readers.push(reader);
            let mut slot = Fence::from_raw(wfd);
            pool.consume(&mut slot);
            assert!(slot.is_none());
        }
        assert_eq!(pool.len(), 4);
        drop(pool);
        for reader in &mut readers {
            assert_closed(reader);
        }
    }

    #[test]
    fn pool_ignores_empty_slots() {
        let mut pool = FencePool::new(false);
        let mut slot = None;
        pool.consume(&mut slot);
        assert!(pool.is_empty());
    }
}
