//! Host context: everything the host process hands the engine at
//! activation.
//!
//! The engine never owns the host side of the boundary. Rings, the clock,
//! and the optional clock-recovery filter are passed in as trait objects;
//! activation validates that every enabled option has the fields it needs
//! and reports the first missing one as a specific error code.

use std::sync::Arc;

use obx_core::ring::{RingReader, RingWriter};

use crate::error::{EngineError, Result};

/// Which data paths the engine runs. Disabled paths carry silence or are
/// skipped entirely; their context fields may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Device-to-host audio.
    pub o2p_audio: bool,
    /// Host-to-device audio.
    pub p2o_audio: bool,
    /// Device-to-host MIDI.
    pub o2p_midi: bool,
    /// Host-to-device MIDI.
    pub p2o_midi: bool,
    /// Clock recovery driven from the inbound audio cycle.
    pub dll: bool,
}

/// Clock-recovery filter owned by the host, fed by the engine.
///
/// `increment` runs once per completed inbound audio transfer, under the
/// engine state lock, and returns whether the filter considers itself
/// locked to the device clock. The engine maps that indication onto the
/// Wait↔Run transitions, so the filter never touches engine state
/// directly.
pub trait ClockRecovery {
    /// Called once when the transfer loops are primed.
    fn init(&mut self, sample_rate: u32, frames_per_transfer: usize, now: f64);

    /// Called at every inbound-transfer completion with the frames the
    /// transfer carried and the host clock reading at completion.
    fn increment(&mut self, frames: usize, now: f64) -> bool;
}

/// Host clock: seconds as `f64`, monotonic.
pub type HostClock = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Hook applying realtime scheduling to the calling thread.
pub type RtPriorityHook = Arc<dyn Fn(i32) + Send + Sync>;

/// Everything the host supplies to [`Engine::activate`](crate::Engine::activate).
///
/// Ring handles follow the data direction names: `p2o` rings are consumed
/// by the engine, `o2p` rings are produced by it. All rings are
/// single-producer/single-consumer; the halves not listed here stay with
/// the host.
pub struct HostContext {
    /// Enabled data paths.
    pub options: EngineOptions,
    /// Host-to-device audio ring (engine reads).
    pub p2o_audio: Option<Box<dyn RingReader>>,
    /// Device-to-host audio ring (engine writes).
    pub o2p_audio: Option<Box<dyn RingWriter>>,
    /// Host-to-device MIDI ring (engine reads).
    pub p2o_midi: Option<Box<dyn RingReader>>,
    /// Device-to-host MIDI ring (engine writes).
    pub o2p_midi: Option<Box<dyn RingWriter>>,
    /// Host clock; a monotonic default is used when absent and no enabled
    /// option requires host timestamps.
    pub clock: Option<HostClock>,
    /// Realtime-priority hook; a SCHED_FIFO default is used when absent.
    pub set_rt_priority: Option<RtPriorityHook>,
    /// Priority handed to the hook; a default is used when absent.
    pub priority: Option<i32>,
    /// Clock-recovery filter, required when `options.dll` is set.
    pub dll: Option<Box<dyn ClockRecovery + Send>>,
}

impl HostContext {
    /// Context with every path disabled and no host services. Callers
    /// enable options and fill the matching fields.
    pub fn new() -> Self {
        Self {
            options: EngineOptions::default(),
            p2o_audio: None,
            o2p_audio: None,
            p2o_midi: None,
            o2p_midi: None,
            clock: None,
            set_rt_priority: None,
            priority: None,
            dll: None,
        }
    }

    /// Check that every enabled option has the fields it needs. Run
    /// automatically by [`Engine::activate`](crate::Engine::activate);
    /// hosts may call it early to fail fast.
    pub fn validate(&self) -> Result<()> {
        let options = &self.options;

        if options.o2p_audio && self.o2p_audio.is_none() {
            return Err(EngineError::NoO2pAudioBuf);
        }
        if options.p2o_audio && self.p2o_audio.is_none() {
            return Err(EngineError::NoP2oAudioBuf);
        }
        if options.o2p_midi && self.o2p_midi.is_none() {
            return Err(EngineError::NoO2pMidiBuf);
        }
        if options.p2o_midi && self.p2o_midi.is_none() {
            return Err(EngineError::NoP2oMidiBuf);
        }
        if (options.o2p_midi || options.p2o_midi || options.dll) && self.clock.is_none() {
            return Err(EngineError::NoGetTime);
        }
        if options.dll && self.dll.is_none() {
            return Err(EngineError::NoDll);
        }
        Ok(())
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use obx_core::ring::ByteRing;

    use super::*;

    #[test]
    fn test_empty_context_validates_with_no_options() {
        assert!(HostContext::new().validate().is_ok());
    }

    #[test]
    fn test_missing_fields_report_specific_codes() {
        let mut ctx = HostContext::new();
        ctx.options.o2p_audio = true;
        assert_eq!(ctx.validate(), Err(EngineError::NoO2pAudioBuf));

        let (producer, _consumer) = ByteRing::with_capacity(1024);
        ctx.o2p_audio = Some(Box::new(producer));
        assert!(ctx.validate().is_ok());

        ctx.options.p2o_audio = true;
        assert_eq!(ctx.validate(), Err(EngineError::NoP2oAudioBuf));
    }

    #[test]
    fn test_midi_and_dll_require_clock() {
        let mut ctx = HostContext::new();
        ctx.options.o2p_midi = true;
        let (producer, _consumer) = ByteRing::with_capacity(1024);
        ctx.o2p_midi = Some(Box::new(producer));
        assert_eq!(ctx.validate(), Err(EngineError::NoGetTime));

        ctx.clock = Some(Arc::new(|| 0.0));
        assert!(ctx.validate().is_ok());

        ctx.options.dll = true;
        assert_eq!(ctx.validate(), Err(EngineError::NoDll));
    }
}
