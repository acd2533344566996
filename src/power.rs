//! Display power and blanking
//!
//! Keeps per-display blank state, applies the display-selection policy
//! (prefer the external display while one is connected), and defers
//! hotplug handling out of the callback context. All HAL calls go through
//! the shared device mutex, which serializes them against composition and
//! vsync control.
//!
//! Vsync delivery ordering is the caller's contract: disable vsync before
//! calling [`PowerController::sleep`], re-enable it only after
//! [`PowerController::wake`] returned.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::hal::{ComposerHal, EXTERNAL_DISPLAY, MAX_DISPLAYS, PRIMARY_DISPLAY};

#[derive(Debug)]
struct PowerInner {
    unblanked: [bool; MAX_DISPLAYS],
    external_connected: bool,
    external_next: bool,
    sleeping: bool,
    num_displays: usize,
}

/// Blank/unblank bookkeeping shared between the main thread (sleep/wake,
/// hotplug notes) and the composition thread (queries, re-evaluation).
pub struct PowerController<H> {
    hal: Arc<Mutex<H>>,
    inner: Arc<Mutex<PowerInner>>,
}

impl<H> Clone for PowerController<H> {
    fn clone(&self) -> Self {
        Self {
            hal: self.hal.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<H: ComposerHal> PowerController<H> {
    pub fn new(hal: Arc<Mutex<H>>, num_displays: usize) -> Self {
        Self {
            hal,
            inner: Arc::new(Mutex::new(PowerInner {
                unblanked: [false; MAX_DISPLAYS],
                external_connected: false,
                external_next: false,
                sleeping: true,
                num_displays: num_displays.min(MAX_DISPLAYS),
            })),
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.inner.lock().unwrap().sleeping
    }

    pub fn unblanked(&self, display: usize) -> bool {
        let inner = self.inner.lock().unwrap();
        display < MAX_DISPLAYS && inner.unblanked[display]
    }

    /// Blank every powered display. Already-blanked displays are skipped,
    /// so a repeated sleep issues no HAL calls.
    pub fn sleep(&self) {
        let mut inner = self.inner.lock().unwrap();
        for display in 0..inner.num_displays {
            if inner.unblanked[display] {
                // A failed blank leaves the display marked powered so the
                // next transition retries it.
                inner.unblanked[display] = self.blank_call(display, true).is_err();
            }
        }
        inner.sleeping = true;
    }

    /// Power up the preferred display: the external one while connected,
    /// the built-in panel otherwise. Idempotent.
    pub fn wake(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.apply_wake(&mut inner);
        inner.sleeping = false;
    }

    fn apply_wake(&self, inner: &mut PowerInner) {
        if inner.external_connected {
            if inner.unblanked[PRIMARY_DISPLAY] {
                info!("blanking internal display");
                inner.unblanked[PRIMARY_DISPLAY] =
                    self.blank_call(PRIMARY_DISPLAY, true).is_err();
            }
            if !inner.unblanked[EXTERNAL_DISPLAY] {
                info!("unblanking external display");
                inner.unblanked[EXTERNAL_DISPLAY] =
                    self.blank_call(EXTERNAL_DISPLAY, false).is_ok();
            }
        } else {
            if inner.unblanked[EXTERNAL_DISPLAY] {
                info!("blanking external display");
                inner.unblanked[EXTERNAL_DISPLAY] =
                    self.blank_call(EXTERNAL_DISPLAY, true).is_err();
            }
            if !inner.unblanked[PRIMARY_DISPLAY] {
                info!("unblanking internal display");
                inner.unblanked[PRIMARY_DISPLAY] =
                    self.blank_call(PRIMARY_DISPLAY, false).is_ok();
            }
        }
    }

    fn blank_call(&self, display_index: usize, blank: bool) -> Result<(), i32> {
        let result = self.hal.lock().unwrap().blank(display_index, blank);
        if let Err(code) = result {
            warn!("blank({display_index}, {blank}) returned {code}");
        }
        result
    }

    /// Note a hotplug event. Called from the event-delivery path; only
    /// records the new state, the power switch happens on the next
    /// [`Self::reevaluate`].
    pub fn note_hotplug(&self, display: u64, connected: bool) {
        if display as usize == EXTERNAL_DISPLAY {
            debug!("external display {}", if connected { "attached" } else { "detached" });
            self.inner.lock().unwrap().external_next = connected;
        }
    }

    /// Apply a pending hotplug change. Returns whether the powered display
    /// set changed, in which case layer geometry must be renegotiated.
    pub fn reevaluate(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.external_next == inner.external_connected {
            return false;
        }
        inner.external_connected = inner.external_next;
        if !inner.sleeping {
            self.apply_wake(&mut inner);
        }
        true
    }
}
