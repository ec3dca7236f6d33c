//! Engine lifecycle state and the shared cross-thread slice of the engine.
//!
//! Three execution contexts touch this state: the audio worker (which also
//! runs the inbound MIDI path), the outbound MIDI worker, and whichever
//! host thread drives the control surface. Everything lives behind one
//! mutex held only for scalar updates, plus a single atomic for the
//! outbound-MIDI handshake.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::context::ClockRecovery;

/// Engine lifecycle status.
///
/// Declaration order carries the lifecycle ordering: everything at or above
/// [`Status::Wait`] keeps the transfer loops running, everything at or
/// below [`Status::Stop`] shuts them down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// A transfer submission failed; shuts down like `Stop`.
    Error,
    /// Termination requested or complete.
    Stop,
    /// Activated and parked, waiting for the boot trigger.
    Ready,
    /// Transfer loops being primed.
    Boot,
    /// Transfers running, clock recovery still settling; inbound audio is
    /// decoded but not published.
    Wait,
    /// Steady state.
    Run,
}

/// Ring occupancy stats in bytes, sampled once per transfer cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latencies {
    /// Device-to-host ring occupancy at the last inbound cycle.
    pub o2p: usize,
    /// High-water mark of `o2p` since boot.
    pub o2p_max: usize,
    /// Host-to-device ring occupancy at the last outbound cycle.
    pub p2o: usize,
    /// High-water mark of `p2o` since boot.
    pub p2o_max: usize,
}

struct SharedState {
    status: Status,
    latencies: Latencies,
    p2o_audio_enabled: bool,
    dll: Option<Box<dyn ClockRecovery + Send>>,
}

/// State shared between the workers and the control surface.
pub(crate) struct EngineShared {
    state: Mutex<SharedState>,
    /// Outbound-MIDI serialization flag: false while a bulk transfer is in
    /// flight, true once its completion has been observed.
    pub(crate) p2o_midi_ready: AtomicBool,
}

impl EngineShared {
    pub(crate) fn new(p2o_audio_enabled: bool) -> Self {
        Self {
            state: Mutex::new(SharedState {
                status: Status::Stop,
                latencies: Latencies::default(),
                p2o_audio_enabled,
                dll: None,
            }),
            p2o_midi_ready: AtomicBool::new(true),
        }
    }

    pub(crate) fn get_status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Apply a transition if the lifecycle allows it. Returns whether the
    /// transition took effect.
    ///
    /// Allowed: Ready→Boot, Boot→Wait|Run, Wait↔Run, any running
    /// state→Stop|Error, Error→Stop. There is no way out of Stop.
    pub(crate) fn set_status(&self, next: Status) -> bool {
        let mut state = self.state.lock().unwrap();
        let current = state.status;
        if current == next {
            return true;
        }
        let allowed = match (current, next) {
            (Status::Ready, Status::Boot) => true,
            (Status::Boot, Status::Wait) | (Status::Boot, Status::Run) => true,
            (Status::Wait, Status::Run) | (Status::Run, Status::Wait) => true,
            (Status::Error, Status::Stop) => true,
            (current, Status::Stop) | (current, Status::Error) => current > Status::Stop,
            _ => false,
        };
        if allowed {
            state.status = next;
            drop(state);
            debug!("status: {current:?} -> {next:?}");
        } else {
            drop(state);
            warn!("refusing status transition {current:?} -> {next:?}");
        }
        allowed
    }

    /// Put the engine into its activation state. Only valid from Stop.
    pub(crate) fn activate(&self, initial: Status, dll: Option<Box<dyn ClockRecovery + Send>>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status != Status::Stop {
            return false;
        }
        state.status = initial;
        state.latencies = Latencies::default();
        state.dll = dll;
        true
    }

    /// Boot-time clock-recovery setup: initialize the filter under the lock
    /// and move to Wait, or straight to Run when none is configured.
    pub(crate) fn boot_clock(&self, sample_rate: u32, frames_per_transfer: usize, now: f64) {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.latencies = Latencies::default();
            match state.dll.as_mut() {
                Some(dll) => {
                    dll.init(sample_rate, frames_per_transfer, now);
                    Status::Wait
                }
                None => Status::Run,
            }
        };
        self.set_status(next);
    }

    /// Per-cycle clock-recovery update, run at inbound-transfer completion.
    ///
    /// The filter's lock indication drives the Wait↔Run transitions.
    /// Returns the status after any transition.
    pub(crate) fn clock_tick(&self, frames: usize, now: f64) -> Status {
        let (status, next) = {
            let mut state = self.state.lock().unwrap();
            let mut next = None;
            if let Some(dll) = state.dll.as_mut() {
                let locked = dll.increment(frames, now);
                match (state.status, locked) {
                    (Status::Wait, true) => next = Some(Status::Run),
                    (Status::Run, false) => next = Some(Status::Wait),
                    _ => {}
                }
            }
            (state.status, next)
        };
        match next {
            Some(next) if self.set_status(next) => next,
            _ => status,
        }
    }

    pub(crate) fn note_o2p_latency(&self, bytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.latencies.o2p = bytes;
        if bytes > state.latencies.o2p_max {
            state.latencies.o2p_max = bytes;
        }
    }

    pub(crate) fn note_p2o_latency(&self, bytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.latencies.p2o = bytes;
        if bytes > state.latencies.p2o_max {
            state.latencies.p2o_max = bytes;
        }
    }

    pub(crate) fn latencies(&self) -> Latencies {
        self.state.lock().unwrap().latencies
    }

    pub(crate) fn p2o_audio_enabled(&self) -> bool {
        self.state.lock().unwrap().p2o_audio_enabled
    }

    pub(crate) fn set_p2o_audio_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().p2o_audio_enabled = enabled;
    }

    pub(crate) fn midi_ready(&self) -> bool {
        self.p2o_midi_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_midi_ready(&self, ready: bool) {
        self.p2o_midi_ready.store(ready, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SettlingDll {
        ticks_to_lock: usize,
    }

    impl ClockRecovery for SettlingDll {
        fn init(&mut self, _sample_rate: u32, _frames_per_transfer: usize, _now: f64) {}

        fn increment(&mut self, _frames: usize, _now: f64) -> bool {
            if self.ticks_to_lock > 0 {
                self.ticks_to_lock -= 1;
            }
            self.ticks_to_lock == 0
        }
    }

    fn running_shared() -> EngineShared {
        let shared = EngineShared::new(true);
        assert!(shared.activate(Status::Boot, None));
        shared.boot_clock(48_000, 56, 0.0);
        shared
    }

    #[test]
    fn test_lifecycle_without_dll_skips_wait() {
        let shared = running_shared();
        assert_eq!(shared.get_status(), Status::Run);
    }

    #[test]
    fn test_lifecycle_with_dll_warms_up() {
        let shared = EngineShared::new(true);
        assert!(shared.activate(Status::Ready, Some(Box::new(SettlingDll { ticks_to_lock: 2 }))));
        assert!(shared.set_status(Status::Boot));
        shared.boot_clock(48_000, 56, 0.0);
        assert_eq!(shared.get_status(), Status::Wait);

        assert_eq!(shared.clock_tick(56, 0.001), Status::Wait);
        assert_eq!(shared.clock_tick(56, 0.002), Status::Run);
        assert_eq!(shared.get_status(), Status::Run);
    }

    #[test]
    fn test_status_never_regresses_through_lifecycle() {
        let shared = EngineShared::new(true);
        shared.activate(Status::Ready, None);

        // Backward transitions are refused
        shared.set_status(Status::Boot);
        assert!(!shared.set_status(Status::Ready));
        shared.set_status(Status::Run);
        assert!(!shared.set_status(Status::Boot));
        assert_eq!(shared.get_status(), Status::Run);
    }

    #[test]
    fn test_stop_is_terminal() {
        let shared = running_shared();
        assert!(shared.set_status(Status::Stop));
        assert!(!shared.set_status(Status::Run));
        assert!(!shared.set_status(Status::Error));
        assert_eq!(shared.get_status(), Status::Stop);
    }

    #[test]
    fn test_error_shuts_down_and_reaches_stop() {
        let shared = running_shared();
        assert!(shared.set_status(Status::Error));
        assert!(shared.get_status() <= Status::Stop);
        assert!(shared.set_status(Status::Stop));
        assert_eq!(shared.get_status(), Status::Stop);
    }

    #[test]
    fn test_latency_high_water_marks() {
        let shared = running_shared();

        shared.note_o2p_latency(100);
        shared.note_o2p_latency(40);
        let lat = shared.latencies();
        assert_eq!(lat.o2p, 40);
        assert_eq!(lat.o2p_max, 100);
        assert!(lat.o2p_max >= lat.o2p);

        shared.note_p2o_latency(10);
        shared.note_p2o_latency(250);
        let lat = shared.latencies();
        assert_eq!(lat.p2o, 250);
        assert_eq!(lat.p2o_max, 250);
    }

    #[test]
    fn test_midi_ready_handshake() {
        let shared = EngineShared::new(false);
        assert!(shared.midi_ready());
        shared.set_midi_ready(false);
        assert!(!shared.midi_ready());
        shared.set_midi_ready(true);
        assert!(shared.midi_ready());
    }
}
