//! Vsync-driven update scheduling
//!
//! Hardware vsync events arrive on a HAL-owned thread at refresh rate.
//! Forwarding each one straight into the render path would be racy and
//! wasteful, so the scheduler debounces them: a render request arms vsync
//! delivery with a safety timeout, the vsync event starts a short idle
//! timer, and the idle timer batches every pending window into a single
//! update delivery. Once nothing needs updating, the safety timeout
//! disarms vsync delivery again so the device is not kept awake.
//!
//! The decision logic lives in [`UpdateScheduler`], a pure state machine
//! emitting [`SchedulerCommand`]s; [`UpdateLoop`] executes those commands
//! against calloop timers and a channel that HAL callbacks post into.
//! Callbacks never touch scheduler state directly.

use std::collections::BTreeSet;
use std::time::Duration;

use calloop::channel::{self, Channel, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, RegistrationToken};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::hal::HalEvent;
use crate::Result;

/// Identifies a toolkit window waiting for an update.
pub type WindowId = u64;

/// Side effects the state machine asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    EnableVsync,
    DisableVsync,
    StartIdleTimer(Duration),
    StartSafetyTimer(Duration),
    CancelTimers,
    Deliver(Vec<WindowId>),
}

/// Timer and event edges fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerInput {
    Vsync,
    IdleElapsed,
    SafetyElapsed,
}

/// The debouncing state machine.
#[derive(Debug)]
pub struct UpdateScheduler {
    display_off: bool,
    armed: bool,
    idle_active: bool,
    pending: BTreeSet<WindowId>,
    idle_time: Duration,
    vsync_grace: Duration,
}

impl UpdateScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            display_off: true,
            armed: false,
            idle_active: false,
            pending: BTreeSet::new(),
            idle_time: config.idle_time,
            vsync_grace: config.vsync_grace,
        }
    }

    /// A window asks to be woken for its next frame. Returns whether the
    /// scheduler took responsibility; `false` means the display is off and
    /// the caller must fall back to its own timing.
    pub fn request_update(
        &mut self,
        window: WindowId,
        out: &mut Vec<SchedulerCommand>,
    ) -> bool {
        if self.display_off {
            return false;
        }
        if !self.armed {
            out.push(SchedulerCommand::EnableVsync);
            self.armed = true;
        }
        // Re-arming restarts the safety timeout instead of double-arming.
        out.push(SchedulerCommand::StartSafetyTimer(self.vsync_grace));
        self.pending.insert(window);
        true
    }

    pub fn input(&mut self, input: SchedulerInput, out: &mut Vec<SchedulerCommand>) {
        match input {
            SchedulerInput::Vsync => {
                if self.display_off {
                    // Stale event from a racing HAL thread; scheduling is
                    // suppressed while asleep.
                    return;
                }
                if !self.idle_active {
                    self.idle_active = true;
                    out.push(SchedulerCommand::StartIdleTimer(self.idle_time));
                }
            }
            SchedulerInput::IdleElapsed => {
                self.idle_active = false;
                self.deliver(out);
            }
            SchedulerInput::SafetyElapsed => {
                // The hardware never delivered a vsync (or nothing asked
                // for one since). Disarm, and unblock anyone still waiting
                // rather than stalling the UI.
                if self.armed {
                    out.push(SchedulerCommand::DisableVsync);
                    self.armed = false;
                }
                if !self.pending.is_empty() {
                    debug!("vsync timed out, forcing update delivery");
                    self.deliver(out);
                }
            }
        }
    }

    pub fn sleep(&mut self, out: &mut Vec<SchedulerCommand>) {
        self.display_off = true;
        out.push(SchedulerCommand::CancelTimers);
        if self.armed {
            out.push(SchedulerCommand::DisableVsync);
            self.armed = false;
        }
        self.idle_active = false;
    }

    pub fn wake(&mut self, out: &mut Vec<SchedulerCommand>) {
        self.display_off = false;
        // Updates requested while asleep start flowing again now.
        if !self.pending.is_empty() {
            out.push(SchedulerCommand::EnableVsync);
            self.armed = true;
            out.push(SchedulerCommand::StartSafetyTimer(self.vsync_grace));
        }
    }

    pub fn display_off(&self) -> bool {
        self.display_off
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn deliver(&mut self, out: &mut Vec<SchedulerCommand>) {
        if self.pending.is_empty() {
            return;
        }
        let windows: Vec<WindowId> = std::mem::take(&mut self.pending).into_iter().collect();
        out.push(SchedulerCommand::Deliver(windows));
    }
}

/// Wires the state machine to real timers and the HAL event channel.
pub struct UpdateLoop {
    event_loop: EventLoop<'static, LoopState>,
    state: LoopState,
    sender: Sender<HalEvent>,
}

pub struct LoopState {
    handle: LoopHandle<'static, LoopState>,
    machine: UpdateScheduler,
    idle_token: Option<RegistrationToken>,
    safety_token: Option<RegistrationToken>,
    vsync_gate: Box<dyn FnMut(bool)>,
    deliver: Box<dyn FnMut(&[WindowId])>,
    hotplug: Box<dyn FnMut(u64, bool, bool)>,
}

impl UpdateLoop {
    pub fn new(
        config: &Config,
        vsync_gate: Box<dyn FnMut(bool)>,
        deliver: Box<dyn FnMut(&[WindowId])>,
        hotplug: Box<dyn FnMut(u64, bool, bool)>,
    ) -> Result<Self> {
        let event_loop: EventLoop<'static, LoopState> =
            EventLoop::try_new().map_err(|e| Error::EventLoop(e.to_string()))?;
        let handle = event_loop.handle();

        let (sender, channel): (Sender<HalEvent>, Channel<HalEvent>) = channel::channel();
        handle
            .insert_source(channel, |event, _, state: &mut LoopState| {
                if let channel::Event::Msg(ev) = event {
                    state.on_hal_event(ev);
                }
            })
            .map_err(|e| Error::EventLoop(e.to_string()))?;

        Ok(Self {
            event_loop,
            state: LoopState {
                handle,
                machine: UpdateScheduler::new(config),
                idle_token: None,
                safety_token: None,
                vsync_gate,
                deliver,
                hotplug,
            },
            sender,
        })
    }

    /// Sender for HAL callback threads; sends only enqueue, the events are
    /// handled on the next [`Self::dispatch`].
    pub fn sender(&self) -> Sender<HalEvent> {
        self.sender.clone()
    }

    pub fn request_update(&mut self, window: WindowId) -> bool {
        let mut commands = Vec::new();
        let accepted = self.state.machine.request_update(window, &mut commands);
        self.state.apply(commands);
        accepted
    }

    pub fn sleep(&mut self) {
        let mut commands = Vec::new();
        self.state.machine.sleep(&mut commands);
        self.state.apply(commands);
    }

    pub fn wake(&mut self) {
        let mut commands = Vec::new();
        self.state.machine.wake(&mut commands);
        self.state.apply(commands);
    }

    pub fn display_off(&self) -> bool {
        self.state.machine.display_off()
    }

    /// Pump timers and queued HAL events. Called from the owning thread's
    /// main loop.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.event_loop
            .dispatch(timeout, &mut self.state)
            .map_err(|e| Error::EventLoop(e.to_string()))
    }
}

impl LoopState {
    fn on_hal_event(&mut self, event: HalEvent) {
        match event {
            HalEvent::Vsync { .. } => self.input(SchedulerInput::Vsync),
            HalEvent::Hotplug {
                display,
                connected,
                primary,
            } => (self.hotplug)(display, connected, primary),
            HalEvent::Refresh { .. } => {}
        }
    }

    fn input(&mut self, input: SchedulerInput) {
        let mut commands = Vec::new();
        self.machine.input(input, &mut commands);
        self.apply(commands);
    }

    fn apply(&mut self, commands: Vec<SchedulerCommand>) {
        for command in commands {
            match command {
                SchedulerCommand::EnableVsync => (self.vsync_gate)(true),
                SchedulerCommand::DisableVsync => (self.vsync_gate)(false),
                SchedulerCommand::StartIdleTimer(duration) => {
                    if let Some(token) = self.idle_token.take() {
                        self.handle.remove(token);
                    }
                    let timer = Timer::from_duration(duration);
                    match self.handle.insert_source(timer, |_, _, state: &mut LoopState| {
                        state.idle_token = None;
                        state.input(SchedulerInput::IdleElapsed);
                        TimeoutAction::Drop
                    }) {
                        Ok(token) => self.idle_token = Some(token),
                        Err(e) => warn!("failed to arm idle timer: {e}"),
                    }
                }
                SchedulerCommand::StartSafetyTimer(duration) => {
                    if let Some(token) = self.safety_token.take() {
                        self.handle.remove(token);
                    }
                    let timer = Timer::from_duration(duration);
                    match self.handle.insert_source(timer, |_, _, state: &mut LoopState| {
                        state.safety_token = None;
                        state.input(SchedulerInput::SafetyElapsed);
                        TimeoutAction::Drop
                    }) {
                        Ok(token) => self.safety_token = Some(token),
                        Err(e) => warn!("failed to arm safety timer: {e}"),
                    }
                }
                SchedulerCommand::CancelTimers => {
                    if let Some(token) = self.idle_token.take() {
                        self.handle.remove(token);
                    }
                    if let Some(token) = self.safety_token.take() {
                        self.handle.remove(token);
                    }
                }
                SchedulerCommand::Deliver(windows) => (self.deliver)(&windows),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Instant;

    fn commands_of(f: impl FnOnce(&mut Vec<SchedulerCommand>)) -> Vec<SchedulerCommand> {
        let mut out = Vec::new();
        f(&mut out);
        out
    }

    fn awake_scheduler() -> UpdateScheduler {
        let mut machine = UpdateScheduler::new(&Config::default());
        let mut out = Vec::new();
        machine.wake(&mut out);
        machine
    }

    #[test]
    fn request_while_off_is_refused() {
        let mut machine = UpdateScheduler::new(&Config::default());
        let mut out = Vec::new();
        assert!(!machine.request_update(1, &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn first_request_arms_vsync_and_safety_timer() {
        let mut machine = awake_scheduler();
        let out = commands_of(|out| {
            assert!(machine.request_update(1, out));
        });
        assert_eq!(
            out,
            vec![
                SchedulerCommand::EnableVsync,
                SchedulerCommand::StartSafetyTimer(Duration::from_millis(50)),
            ]
        );
    }

    #[test]
    fn repeated_requests_restart_instead_of_double_arming() {
        let mut machine = awake_scheduler();
        let mut out = Vec::new();
        machine.request_update(1, &mut out);
        out.clear();
        machine.request_update(2, &mut out);
        assert_eq!(
            out,
            vec![SchedulerCommand::StartSafetyTimer(Duration::from_millis(50))]
        );
        assert_eq!(machine.pending_count(), 2);
    }

    #[test]
    fn vsync_batches_requests_into_one_delivery() {
        let mut machine = awake_scheduler();
        let mut out = Vec::new();
        for window in 1..=4 {
            machine.request_update(window, &mut out);
        }
        out.clear();

        machine.input(SchedulerInput::Vsync, &mut out);
        assert_eq!(
            out,
            vec![SchedulerCommand::StartIdleTimer(Duration::from_millis(5))]
        );
        out.clear();

        // Further vsyncs within the idle window do not re-arm the timer.
        machine.input(SchedulerInput::Vsync, &mut out);
        assert!(out.is_empty());

        machine.input(SchedulerInput::IdleElapsed, &mut out);
        assert_eq!(out, vec![SchedulerCommand::Deliver(vec![1, 2, 3, 4])]);
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn safety_timeout_disarms_and_force_delivers() {
        let mut machine = awake_scheduler();
        let mut out = Vec::new();
        machine.request_update(7, &mut out);
        out.clear();

        machine.input(SchedulerInput::SafetyElapsed, &mut out);
        assert_eq!(
            out,
            vec![
                SchedulerCommand::DisableVsync,
                SchedulerCommand::Deliver(vec![7]),
            ]
        );
    }

    #[test]
    fn safety_timeout_with_nothing_pending_just_disarms() {
        let mut machine = awake_scheduler();
        let mut out = Vec::new();
        machine.request_update(7, &mut out);
        machine.input(SchedulerInput::Vsync, &mut out);
        machine.input(SchedulerInput::IdleElapsed, &mut out);
        out.clear();

        machine.input(SchedulerInput::SafetyElapsed, &mut out);
        assert_eq!(out, vec![SchedulerCommand::DisableVsync]);
    }

    #[test]
    fn sleep_cancels_everything_and_wake_rearms_pending() {
        let mut machine = awake_scheduler();
        let mut out = Vec::new();
        machine.request_update(3, &mut out);
        out.clear();

        machine.sleep(&mut out);
        assert_eq!(
            out,
            vec![SchedulerCommand::CancelTimers, SchedulerCommand::DisableVsync]
        );
        out.clear();

        // Events racing in after sleep are ignored.
        machine.input(SchedulerInput::Vsync, &mut out);
        assert!(out.is_empty());
        assert!(!machine.request_update(4, &mut out));

        machine.wake(&mut out);
        assert_eq!(
            out,
            vec![
                SchedulerCommand::EnableVsync,
                SchedulerCommand::StartSafetyTimer(Duration::from_millis(50)),
            ]
        );
    }

    struct DriverProbe {
        deliveries: Rc<RefCell<Vec<Vec<WindowId>>>>,
        gates: Rc<RefCell<Vec<bool>>>,
    }

    fn probe_loop() -> (UpdateLoop, DriverProbe) {
        let deliveries: Rc<RefCell<Vec<Vec<WindowId>>>> = Rc::new(RefCell::new(Vec::new()));
        let gates: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
        let deliveries_in = deliveries.clone();
        let gates_in = gates.clone();
        let update_loop = UpdateLoop::new(
            &Config::default(),
            Box::new(move |on| gates_in.borrow_mut().push(on)),
            Box::new(move |windows| deliveries_in.borrow_mut().push(windows.to_vec())),
            Box::new(|_, _, _| {}),
        )
        .unwrap();
        (update_loop, DriverProbe { deliveries, gates })
    }

    fn dispatch_until(
        update_loop: &mut UpdateLoop,
        mut done: impl FnMut() -> bool,
        limit: Duration,
    ) {
        let start = Instant::now();
        while !done() && start.elapsed() < limit {
            update_loop.dispatch(Some(Duration::from_millis(5))).unwrap();
        }
    }

    #[test]
    fn rapid_requests_produce_one_batched_delivery() {
        let (mut update_loop, probe) = probe_loop();
        update_loop.wake();

        for window in 1..=3 {
            assert!(update_loop.request_update(window));
        }
        update_loop
            .sender()
            .send(HalEvent::Vsync {
                display: 0,
                timestamp_ns: 0,
            })
            .unwrap();

        dispatch_until(
            &mut update_loop,
            || !probe.deliveries.borrow().is_empty(),
            Duration::from_secs(1),
        );

        assert_eq!(probe.deliveries.borrow().len(), 1);
        assert_eq!(probe.deliveries.borrow()[0], vec![1, 2, 3]);

        // With nothing pending the safety timeout eventually disarms vsync.
        dispatch_until(
            &mut update_loop,
            || probe.gates.borrow().contains(&false),
            Duration::from_secs(1),
        );
        assert_eq!(*probe.gates.borrow(), vec![true, false]);
        assert_eq!(probe.deliveries.borrow().len(), 1);
    }

    #[test]
    fn missing_vsync_still_delivers_via_safety_timeout() {
        let (mut update_loop, probe) = probe_loop();
        update_loop.wake();
        assert!(update_loop.request_update(9));

        // No vsync is ever sent; the grace timer must unblock the window.
        dispatch_until(
            &mut update_loop,
            || !probe.deliveries.borrow().is_empty(),
            Duration::from_secs(1),
        );
        assert_eq!(probe.deliveries.borrow()[0], vec![9]);
        assert_eq!(*probe.gates.borrow(), vec![true, false]);
    }

    #[test]
    fn sleep_suppresses_delivery() {
        let (mut update_loop, probe) = probe_loop();
        update_loop.wake();
        assert!(update_loop.request_update(5));
        update_loop.sleep();
        assert!(!update_loop.request_update(6));

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(120) {
            update_loop.dispatch(Some(Duration::from_millis(5))).unwrap();
        }
        assert!(probe.deliveries.borrow().is_empty());
        // Armed then disarmed by sleep, nothing after.
        assert_eq!(*probe.gates.borrow(), vec![true, false]);
    }
}
