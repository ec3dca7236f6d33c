//! USB-MIDI events and their timestamped ring record.
//!
//! MIDI arrives and leaves on the bulk endpoints as 4-byte USB-MIDI event
//! packets: cable/CIN nibbles in the first byte, then up to three message
//! bytes. Between the engine and the host the events travel through byte
//! rings together with the host-clock timestamp taken at arrival (inbound)
//! or scheduling time (outbound).

use byteorder::{ByteOrder, LittleEndian};

/// Size of one event on the bulk endpoints, in bytes.
pub const EVENT_SIZE: usize = 4;

/// Size of one timestamped event record in the rings, in bytes.
pub const RING_EVENT_SIZE: usize = EVENT_SIZE + 8;

/// A USB-MIDI event paired with a host-clock timestamp in seconds.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// Raw 4-byte USB-MIDI event packet.
    pub raw: [u8; EVENT_SIZE],
    /// Host clock reading in seconds.
    pub time: f64,
}

impl MidiEvent {
    /// Create an event from its wire bytes and a timestamp.
    pub fn new(raw: [u8; EVENT_SIZE], time: f64) -> Self {
        Self { raw, time }
    }

    /// Whether a packet's first byte marks an event the engine forwards.
    ///
    /// Accepts the CIN range `0x8..=0xF` on cable 0: the standard voice
    /// messages plus single-byte, which is everything the framed devices
    /// emit. Anything else (sysex continuations, reserved CINs, other
    /// cables) is dropped at the endpoint.
    #[inline]
    pub fn is_voice(head: u8) -> bool {
        (0x08..=0x0F).contains(&head)
    }

    /// Serialize into a ring record: 4 raw bytes, then the timestamp as a
    /// little-endian f64.
    pub fn write_to(&self, record: &mut [u8]) {
        debug_assert!(record.len() >= RING_EVENT_SIZE);
        record[..EVENT_SIZE].copy_from_slice(&self.raw);
        LittleEndian::write_f64(&mut record[EVENT_SIZE..RING_EVENT_SIZE], self.time);
    }

    /// Deserialize from a ring record written by [`write_to`](Self::write_to).
    pub fn read_from(record: &[u8]) -> Self {
        debug_assert!(record.len() >= RING_EVENT_SIZE);
        let mut raw = [0u8; EVENT_SIZE];
        raw.copy_from_slice(&record[..EVENT_SIZE]);
        Self {
            raw,
            time: LittleEndian::read_f64(&record[EVENT_SIZE..RING_EVENT_SIZE]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_filter_range() {
        for head in 0x00..=0x07u8 {
            assert!(!MidiEvent::is_voice(head), "{head:#04x} should be dropped");
        }
        for head in 0x08..=0x0Fu8 {
            assert!(MidiEvent::is_voice(head), "{head:#04x} should pass");
        }
        // Non-zero cable nibbles are outside the accepted range
        assert!(!MidiEvent::is_voice(0x19));
        assert!(!MidiEvent::is_voice(0xF8));
    }

    #[test]
    fn test_record_round_trip() {
        let event = MidiEvent::new([0x09, 0x90, 0x3C, 0x64], 12.3456789);

        let mut record = [0u8; RING_EVENT_SIZE];
        event.write_to(&mut record);
        let back = MidiEvent::read_from(&record);

        assert_eq!(back, event);
    }

    #[test]
    fn test_record_layout() {
        let event = MidiEvent::new([0x0B, 0xB0, 0x01, 0x7F], 0.0);

        let mut record = [0u8; RING_EVENT_SIZE];
        event.write_to(&mut record);

        assert_eq!(&record[..4], &[0x0B, 0xB0, 0x01, 0x7F]);
        assert_eq!(&record[4..], &[0u8; 8]);
    }
}
