//! MIDI movers: inbound timestamping and outbound pacing.
//!
//! Inbound runs on the USB worker when the bulk poll returns data: events
//! are filtered to the voice CIN range, stamped with the host clock read
//! at completion (one stamp per packet), and pushed to the host ring.
//!
//! Outbound runs on its own worker. Events are pulled from the host ring
//! one at a time and batched into a single bulk transfer for as long as
//! their timestamps do not advance; a later-stamped event closes the batch
//! and the gap to it is slept off after the flush, which reproduces the
//! host's event spacing on the wire.

use log::warn;
use obx_core::ring::{RingReader, RingWriter};
use obx_wire::MidiEvent;
use obx_wire::midi::{EVENT_SIZE, RING_EVENT_SIZE};
use obx_wire::{SAMPLE_TIME_NS, USB_BULK_MIDI_SIZE};

use crate::state::{EngineShared, Status};

/// Shortest outbound pacing sleep: half the fill time of a 32-frame
/// buffer at the device rate, so scheduling jitter stays under half a
/// short buffer.
pub(crate) const MIN_TICK_NS: u64 = SAMPLE_TIME_NS * 32 / 2;

/// Most events one bulk transfer can carry.
const EVENTS_PER_TRANSFER: usize = USB_BULK_MIDI_SIZE / EVENT_SIZE;

/// Inbound cycle: a MIDI-in poll returned `data`.
///
/// Below Run the whole packet is dropped. Each valid 4-byte event is
/// stamped with `now` and pushed; events the ring cannot take are dropped
/// with a warning.
pub(crate) fn on_midi_in(data: &[u8], shared: &EngineShared, ring: &mut dyn RingWriter, now: f64) {
    if shared.get_status() < Status::Run {
        return;
    }

    for packet in data.chunks_exact(EVENT_SIZE) {
        if !MidiEvent::is_voice(packet[0]) {
            continue;
        }

        let event = MidiEvent::new([packet[0], packet[1], packet[2], packet[3]], now);
        if ring.write_space() >= RING_EVENT_SIZE {
            let mut record = [0u8; RING_EVENT_SIZE];
            event.write_to(&mut record);
            ring.write(&record);
        } else {
            warn!("o2p: MIDI ring overflow, dropping event");
        }
    }
}

/// A batch ready for the wire: `len` bytes of events and the pacing gap
/// to sleep after flushing them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MidiBatch {
    pub len: usize,
    pub diff: f64,
}

/// Outbound batch builder.
///
/// Owns the bulk staging buffer and the pacing state: the stamp of the
/// newest event taken (`last_time`) and the event that closed the previous
/// batch, which opens the next one.
pub(crate) struct MidiOutPacer {
    data: [u8; USB_BULK_MIDI_SIZE],
    last_time: f64,
    pending: Option<MidiEvent>,
}

impl MidiOutPacer {
    /// `now` seeds the pacing clock so the first gap is measured from
    /// activation, not from the host clock's epoch.
    pub(crate) fn new(now: f64) -> Self {
        Self {
            data: [0; USB_BULK_MIDI_SIZE],
            last_time: now,
            pending: None,
        }
    }

    /// Bytes staged by the latest [`collect`](Self::collect).
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pull events into a fresh batch.
    ///
    /// Accumulation stops when the ring runs dry, the buffer fills, or an
    /// event stamped later than everything taken so far appears; that
    /// event records the pacing gap and waits for the next batch.
    pub(crate) fn collect(&mut self, ring: &mut dyn RingReader) -> MidiBatch {
        self.data.fill(0);
        let mut len = 0;
        let mut diff = 0.0;

        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => {
                    if ring.read_space() < RING_EVENT_SIZE {
                        break;
                    }
                    let mut record = [0u8; RING_EVENT_SIZE];
                    ring.read(&mut record);
                    MidiEvent::read_from(&record)
                }
            };

            if event.time > self.last_time {
                diff = event.time - self.last_time;
                self.last_time = event.time;
                self.pending = Some(event);
                break;
            }

            self.data[len..len + EVENT_SIZE].copy_from_slice(&event.raw);
            len += EVENT_SIZE;
            if len >= EVENTS_PER_TRANSFER * EVENT_SIZE {
                break;
            }
        }

        MidiBatch { len, diff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecRing {
        data: Vec<u8>,
        write_space: usize,
    }

    impl VecRing {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                write_space: usize::MAX,
            }
        }

        fn push_event(&mut self, raw: [u8; 4], time: f64) {
            let mut record = [0u8; RING_EVENT_SIZE];
            MidiEvent::new(raw, time).write_to(&mut record);
            self.data.extend_from_slice(&record);
        }

        fn events(&self) -> Vec<MidiEvent> {
            self.data
                .chunks_exact(RING_EVENT_SIZE)
                .map(MidiEvent::read_from)
                .collect()
        }
    }

    impl RingWriter for VecRing {
        fn write_space(&self) -> usize {
            self.write_space
        }

        fn read_space(&self) -> usize {
            self.data.len()
        }

        fn write(&mut self, src: &[u8]) -> usize {
            self.data.extend_from_slice(src);
            src.len()
        }
    }

    impl RingReader for VecRing {
        fn read_space(&self) -> usize {
            self.data.len()
        }

        fn read(&mut self, dst: &mut [u8]) -> usize {
            let count = dst.len().min(self.data.len());
            dst[..count].copy_from_slice(&self.data[..count]);
            self.data.drain(..count);
            count
        }

        fn discard(&mut self, max: usize) -> usize {
            let count = max.min(self.data.len());
            self.data.drain(..count);
            count
        }
    }

    fn running_shared() -> EngineShared {
        let shared = EngineShared::new(true);
        shared.activate(Status::Boot, None);
        shared.boot_clock(obx_wire::SAMPLE_RATE, 56, 0.0);
        shared
    }

    #[test]
    fn test_inbound_filters_by_cin_and_stamps_arrival() {
        let shared = running_shared();
        let mut ring = VecRing::new();

        // 0x07 is outside the voice range, 0x09 is note-on
        let data = [0x07, 0x90, 0x3C, 0x64, 0x09, 0x90, 0x3C, 0x64];
        on_midi_in(&data, &shared, &mut ring, 1.25);

        let events = ring.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw, [0x09, 0x90, 0x3C, 0x64]);
        assert_eq!(events[0].time, 1.25);
    }

    #[test]
    fn test_inbound_dropped_below_run() {
        let shared = EngineShared::new(true);
        shared.activate(Status::Wait, None);
        let mut ring = VecRing::new();

        on_midi_in(&[0x09, 0x90, 0x3C, 0x64], &shared, &mut ring, 0.5);

        assert!(ring.events().is_empty());
    }

    #[test]
    fn test_inbound_overflow_drops_event() {
        let shared = running_shared();
        let mut ring = VecRing::new();
        ring.write_space = RING_EVENT_SIZE - 1;

        on_midi_in(&[0x09, 0x90, 0x3C, 0x64], &shared, &mut ring, 0.5);

        assert!(ring.data.is_empty());
    }

    #[test]
    fn test_same_stamp_events_share_a_batch_and_later_stamp_splits() {
        let mut ring = VecRing::new();
        ring.push_event([0x09, 0x90, 0x3C, 0x64], 1.0);
        ring.push_event([0x08, 0x80, 0x3C, 0x40], 1.0);
        ring.push_event([0x09, 0x90, 0x40, 0x64], 1.010);

        let mut pacer = MidiOutPacer::new(0.0);

        // The first event opens pacing from t=0
        let first = pacer.collect(&mut ring);
        assert_eq!(first.len, 0);
        assert!((first.diff - 1.0).abs() < 1e-9);

        // Both t=1.0 events ride one transfer; t=1.010 closes it
        let second = pacer.collect(&mut ring);
        assert_eq!(second.len, 8);
        assert_eq!(&pacer.data()[..4], &[0x09, 0x90, 0x3C, 0x64]);
        assert_eq!(&pacer.data()[4..8], &[0x08, 0x80, 0x3C, 0x40]);
        assert!((second.diff - 0.010).abs() < 1e-9);

        // The later event ships alone in the next batch
        let third = pacer.collect(&mut ring);
        assert_eq!(third.len, 4);
        assert_eq!(&pacer.data()[..4], &[0x09, 0x90, 0x40, 0x64]);
        assert_eq!(third.diff, 0.0);

        // Drained: nothing left, no pacing gap
        let drained = pacer.collect(&mut ring);
        assert_eq!(drained, MidiBatch { len: 0, diff: 0.0 });
    }

    #[test]
    fn test_batch_start_zeroes_stale_bytes() {
        let mut ring = VecRing::new();
        ring.push_event([0x09, 0x90, 0x3C, 0x64], 0.0);
        ring.push_event([0x08, 0x80, 0x3C, 0x40], 0.0);

        let mut pacer = MidiOutPacer::new(0.0);
        assert_eq!(pacer.collect(&mut ring).len, 8);

        // A shorter follow-up batch must not leak the previous tail
        ring.push_event([0x0B, 0xB0, 0x01, 0x10], 0.0);
        assert_eq!(pacer.collect(&mut ring).len, 4);
        assert!(pacer.data()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_batch_caps_at_transfer_capacity() {
        let mut ring = VecRing::new();
        for _ in 0..EVENTS_PER_TRANSFER + 5 {
            ring.push_event([0x09, 0x90, 0x3C, 0x64], 0.0);
        }

        let mut pacer = MidiOutPacer::new(0.0);
        let batch = pacer.collect(&mut ring);

        assert_eq!(batch.len, USB_BULK_MIDI_SIZE);
        assert_eq!(ring.data.len(), 5 * RING_EVENT_SIZE);
    }

    #[test]
    fn test_min_tick_is_half_a_short_buffer() {
        // 48 kHz: 20833 ns per frame, 32-frame buffer, half of it
        assert_eq!(MIN_TICK_NS, 20_833 * 32 / 2);
    }
}
