//! The transport engine: lifecycle, worker threads, factories.
//!
//! One worker owns all USB I/O for audio plus the inbound MIDI poll, so
//! every transfer completion is handled on a single thread, in order. A
//! second worker paces outbound MIDI against the event timestamps. The
//! host controls the engine through a small surface: `boot`, `stop`,
//! `set_p2o_audio`, `get_status`, `latencies`, `wait`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use obx_core::MonotonicClock;
use obx_core::ring::{RingReader, RingWriter};
use obx_wire::{SAMPLE_RATE, USB_BULK_MIDI_SIZE};

use crate::audio::AudioIo;
use crate::context::{HostClock, HostContext, RtPriorityHook};
use crate::device::DeviceDesc;
use crate::error::{EngineError, Result};
use crate::midi::{self, MIN_TICK_NS, MidiOutPacer};
use crate::state::{EngineShared, Latencies, Status};
use crate::transfer::{TransferFault, TransferLayout, UsbLink, classify};

/// Default blocks carried per audio transfer. More blocks lower the
/// per-transfer overhead, fewer lower the latency floor.
pub const DEFAULT_BLOCKS_PER_TRANSFER: usize = 24;

const MIN_BLOCKS_PER_TRANSFER: usize = 2;
const MAX_BLOCKS_PER_TRANSFER: usize = 32;

/// SCHED_FIFO priority applied when the host supplies no hook or value.
pub const DEFAULT_RT_PRIORITY: i32 = 20;

fn validate_blocks(blocks_per_transfer: usize) -> Result<()> {
    if (MIN_BLOCKS_PER_TRANSFER..=MAX_BLOCKS_PER_TRANSFER).contains(&blocks_per_transfer) {
        Ok(())
    } else {
        warn!(
            "blocks per transfer must be {MIN_BLOCKS_PER_TRANSFER}..={MAX_BLOCKS_PER_TRANSFER}, \
             got {blocks_per_transfer}"
        );
        Err(EngineError::Generic)
    }
}

fn apply_rt_priority(hook: Option<&RtPriorityHook>, priority: i32) {
    match hook {
        Some(hook) => hook(priority),
        None => default_rt_priority(priority),
    }
}

#[cfg(unix)]
fn default_rt_priority(priority: i32) {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain scheduling syscall on the calling thread with a POD
    // parameter block.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!("cannot set realtime priority {priority} (error {rc})");
    }
}

#[cfg(not(unix))]
fn default_rt_priority(_priority: i32) {}

/// A transport engine bound to one opened device.
///
/// The engine is the ownership root: wire buffers and ring handles move
/// into the workers at activation, and the workers are joined before the
/// USB handle is released, so no transfer work can outlive the device.
pub struct Engine {
    link: Arc<UsbLink>,
    desc: &'static DeviceDesc,
    layout: TransferLayout,
    shared: Arc<EngineShared>,
    audio_thread: Option<JoinHandle<()>>,
    midi_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Open a supported device by bus number and address.
    pub fn open(bus: u8, address: u8, blocks_per_transfer: usize) -> Result<Self> {
        validate_blocks(blocks_per_transfer)?;
        let (link, desc) = UsbLink::open_bus_addr(bus, address)?;
        Ok(Self::with_link(link, desc, blocks_per_transfer))
    }

    /// Wrap an externally-opened device file descriptor (for sandboxed
    /// hosts that receive the descriptor from a broker).
    #[cfg(unix)]
    pub fn open_fd(fd: std::os::unix::io::RawFd, blocks_per_transfer: usize) -> Result<Self> {
        validate_blocks(blocks_per_transfer)?;
        let (link, desc) = UsbLink::open_fd(fd)?;
        Ok(Self::with_link(link, desc, blocks_per_transfer))
    }

    fn with_link(link: UsbLink, desc: &'static DeviceDesc, blocks_per_transfer: usize) -> Self {
        Self {
            link: Arc::new(link),
            desc,
            layout: TransferLayout::new(desc, blocks_per_transfer),
            shared: Arc::new(EngineShared::new(false)),
            audio_thread: None,
            midi_thread: None,
        }
    }

    /// Model name of the attached device.
    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Descriptor of the attached device.
    pub fn descriptor(&self) -> &'static DeviceDesc {
        self.desc
    }

    /// Frames moved by one audio transfer in each direction.
    pub fn frames_per_transfer(&self) -> usize {
        self.layout.frames_per_transfer
    }

    /// Validate the context and start the workers.
    ///
    /// With the clock-recovery option set the engine parks in `Ready`
    /// until [`boot`](Self::boot); without it the workers boot on their
    /// own and the engine reaches `Run` directly.
    pub fn activate(&mut self, mut context: HostContext) -> Result<()> {
        context.validate()?;
        if self.audio_thread.is_some() || self.midi_thread.is_some() {
            warn!("activate called on a running engine");
            return Err(EngineError::Generic);
        }

        let options = context.options;
        let initial = if options.dll { Status::Ready } else { Status::Boot };
        self.shared.set_p2o_audio_enabled(options.p2o_audio);
        if !self.shared.activate(initial, context.dll.take()) {
            warn!("activate called before the previous run finished");
            return Err(EngineError::Generic);
        }

        let clock: HostClock = context.clock.take().unwrap_or_else(|| {
            let clock = MonotonicClock::new();
            Arc::new(move || clock.now())
        });
        let priority = context.priority.unwrap_or(DEFAULT_RT_PRIORITY);
        let rt_hook = context.set_rt_priority.take();

        let audio_worker = if options.o2p_audio || options.p2o_audio || options.o2p_midi {
            Some(AudioWorker {
                shared: Arc::clone(&self.shared),
                link: Arc::clone(&self.link),
                layout: self.layout,
                io: AudioIo::new(self.desc, self.layout),
                clock: Arc::clone(&clock),
                o2p_audio: if options.o2p_audio { context.o2p_audio.take() } else { None },
                p2o_audio: if options.p2o_audio { context.p2o_audio.take() } else { None },
                o2p_midi: if options.o2p_midi { context.o2p_midi.take() } else { None },
                data_in: vec![0; self.layout.data_in_len],
                data_out: vec![0; self.layout.data_out_len],
                midi_in: vec![0; USB_BULK_MIDI_SIZE],
            })
        } else {
            None
        };

        let midi_worker = match (options.p2o_midi, context.p2o_midi.take()) {
            (true, Some(ring)) => Some(MidiWorker {
                shared: Arc::clone(&self.shared),
                link: Arc::clone(&self.link),
                clock: Arc::clone(&clock),
                p2o_midi: ring,
            }),
            _ => None,
        };

        if let Some(worker) = audio_worker {
            let hook = rt_hook.clone();
            self.audio_thread = Some(
                thread::Builder::new()
                    .name("obx-audio".into())
                    .spawn(move || {
                        apply_rt_priority(hook.as_ref(), priority);
                        worker.run();
                    })
                    .map_err(|e| {
                        error!("cannot spawn audio worker: {e}");
                        self.shared.set_status(Status::Stop);
                        EngineError::Generic
                    })?,
            );
        }

        if let Some(worker) = midi_worker {
            let spawned = thread::Builder::new().name("obx-midi".into()).spawn(move || {
                apply_rt_priority(rt_hook.as_ref(), priority);
                worker.run();
            });
            match spawned {
                Ok(handle) => self.midi_thread = Some(handle),
                Err(e) => {
                    error!("cannot spawn MIDI worker: {e}");
                    self.shared.set_status(Status::Stop);
                    self.wait();
                    return Err(EngineError::Generic);
                }
            }
        }

        info!("{} activated", self.desc.name);
        Ok(())
    }

    /// Trigger the Ready→Boot transition. With clock recovery configured
    /// this is the host's start signal; without it the engine boots by
    /// itself. Returns whether the transition took effect.
    pub fn boot(&self) -> bool {
        self.shared.set_status(Status::Boot)
    }

    /// Request termination. Workers observe it within one transfer period
    /// (audio) or one pacing tick (MIDI).
    pub fn stop(&self) {
        self.shared.set_status(Status::Stop);
    }

    /// Current lifecycle status.
    pub fn get_status(&self) -> Status {
        self.shared.get_status()
    }

    /// Ring occupancy stats, in bytes.
    pub fn latencies(&self) -> Latencies {
        self.shared.latencies()
    }

    /// Enable or disable the host-to-device audio path at runtime. While
    /// disabled the device receives silence.
    pub fn set_p2o_audio(&self, enabled: bool) {
        self.shared.set_p2o_audio_enabled(enabled);
    }

    /// Block until both workers have returned.
    pub fn wait(&mut self) {
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.midi_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.wait();
        // The USB link drops last, releasing the claimed interfaces and
        // closing the device after no callback work can remain.
    }
}

/// Worker driving the audio endpoints and the inbound MIDI poll.
struct AudioWorker {
    shared: Arc<EngineShared>,
    link: Arc<UsbLink>,
    layout: TransferLayout,
    io: AudioIo,
    clock: HostClock,
    o2p_audio: Option<Box<dyn RingWriter>>,
    p2o_audio: Option<Box<dyn RingReader>>,
    o2p_midi: Option<Box<dyn RingWriter>>,
    data_in: Vec<u8>,
    data_out: Vec<u8>,
    midi_in: Vec<u8>,
}

impl AudioWorker {
    fn run(mut self) {
        // Handoff point: the boot trigger arrives from the host thread.
        while self.shared.get_status() == Status::Ready {
            std::hint::spin_loop();
        }

        if self.shared.get_status() == Status::Boot {
            self.io.reset();
            let now = (self.clock)();
            self.shared.boot_clock(SAMPLE_RATE, self.layout.frames_per_transfer, now);
        }

        while self.shared.get_status() >= Status::Wait {
            if !self.cycle() {
                break;
            }
        }

        if self.shared.get_status() <= Status::Stop {
            // Leave the host ring frame-aligned and the staging buffer
            // silent so a later activation does not replay stale audio.
            if let Some(ring) = self.p2o_audio.as_deref_mut() {
                let space = ring.read_space();
                ring.discard(space - space % self.layout.p2o_frame_size);
            }
            self.io.clear_p2o();
        }
    }

    /// One transfer cycle over the three endpoints this worker owns.
    /// Returns false when a fatal fault ends the loop.
    fn cycle(&mut self) -> bool {
        match self.link.read_audio_in(&mut self.data_in) {
            Ok(n) if n == self.data_in.len() => {
                let now = (self.clock)();
                self.io
                    .on_audio_in(&self.data_in, &self.shared, self.o2p_audio.as_deref_mut(), now);
            }
            Ok(n) => warn!("audio-in: short transfer ({n} of {} bytes)", self.data_in.len()),
            Err(e) => {
                if !self.tolerate("audio-in", e) {
                    return false;
                }
            }
        }

        self.io
            .fill_audio_out(&self.shared, self.p2o_audio.as_deref_mut(), &mut self.data_out);
        if let Err(e) = self.link.write_audio_out(&self.data_out) {
            if !self.tolerate("audio-out", e) {
                return false;
            }
        }

        if let Some(ring) = self.o2p_midi.as_deref_mut() {
            match self.link.poll_midi_in(&mut self.midi_in) {
                Ok(n) if n > 0 => {
                    let now = (self.clock)();
                    midi::on_midi_in(&self.midi_in[..n], &self.shared, ring, now);
                }
                Ok(_) => {}
                Err(e) => match classify(e) {
                    // Idle endpoint; poll again next cycle
                    TransferFault::Timeout => {}
                    TransferFault::Transient => warn!("MIDI-in: transfer failed: {e}; resubmitting"),
                    TransferFault::Fatal => {
                        error!("MIDI-in: cannot submit transfer: {e}");
                        self.shared.set_status(Status::Error);
                        return false;
                    }
                },
            }
        }

        true
    }

    fn tolerate(&self, endpoint: &str, e: rusb::Error) -> bool {
        match classify(e) {
            TransferFault::Timeout => {
                warn!("{endpoint}: transfer timed out; resubmitting");
                true
            }
            TransferFault::Transient => {
                warn!("{endpoint}: transfer failed: {e}; resubmitting");
                true
            }
            TransferFault::Fatal => {
                error!("{endpoint}: cannot submit transfer: {e}");
                self.shared.set_status(Status::Error);
                false
            }
        }
    }
}

/// Worker pacing outbound MIDI against the event timestamps.
struct MidiWorker {
    shared: Arc<EngineShared>,
    link: Arc<UsbLink>,
    clock: HostClock,
    p2o_midi: Box<dyn RingReader>,
}

impl MidiWorker {
    fn run(mut self) {
        let mut pacer = MidiOutPacer::new((self.clock)());

        while self.shared.get_status() > Status::Stop {
            let batch = pacer.collect(&mut *self.p2o_midi);

            if batch.len > 0 {
                self.shared.set_midi_ready(false);
                // Transfers are fixed-size; events beyond `len` are zero
                // CINs the device ignores.
                match self.link.write_midi_out(pacer.data()) {
                    Ok(_) => {}
                    Err(e) => match classify(e) {
                        TransferFault::Fatal => {
                            error!("MIDI-out: cannot submit transfer: {e}");
                            self.shared.set_status(Status::Error);
                            break;
                        }
                        _ => warn!("MIDI-out: transfer failed: {e}; resubmitting"),
                    },
                }
                self.shared.set_midi_ready(true);
            }

            let pause = if batch.diff > 0.0 {
                Duration::from_secs_f64(batch.diff)
            } else {
                Duration::from_nanos(MIN_TICK_NS)
            };
            thread::sleep(pause);

            while !self.shared.midi_ready() && self.shared.get_status() > Status::Stop {
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_per_transfer_bounds() {
        assert!(validate_blocks(MIN_BLOCKS_PER_TRANSFER).is_ok());
        assert!(validate_blocks(DEFAULT_BLOCKS_PER_TRANSFER).is_ok());
        assert!(validate_blocks(MAX_BLOCKS_PER_TRANSFER).is_ok());
        assert_eq!(validate_blocks(0), Err(EngineError::Generic));
        assert_eq!(validate_blocks(1), Err(EngineError::Generic));
        assert_eq!(validate_blocks(33), Err(EngineError::Generic));
    }

    #[test]
    fn test_rt_priority_prefers_host_hook() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_hook = Arc::clone(&seen);
        let hook: RtPriorityHook = Arc::new(move |priority| {
            seen_in_hook.lock().unwrap().push(priority);
        });

        apply_rt_priority(Some(&hook), 7);
        assert_eq!(seen.lock().unwrap().as_slice(), &[7]);
    }
}
