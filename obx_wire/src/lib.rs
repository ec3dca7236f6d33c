//! # OBX Wire
//!
//! On-wire formats spoken by Overbridge-class hardware:
//!
//! - [`block`] - the framed audio block format carried on the vendor
//!   interrupt endpoints (big-endian header + big-endian i32 samples)
//! - [`midi`] - 4-byte USB-MIDI events carried on the bulk endpoints, plus
//!   the timestamped record format they travel in between threads
//!
//! Everything here is pure data marshalling: no I/O, no allocation on the
//! realtime paths.

pub mod block;
pub mod midi;

pub use block::{BlockDecoder, BlockEncoder, block_len};
pub use midi::MidiEvent;

/// Device sample rate in Hz. The framed alternate setting always runs here.
pub const SAMPLE_RATE: u32 = 48_000;

/// Duration of one frame in nanoseconds.
pub const SAMPLE_TIME_NS: u64 = 1_000_000_000 / SAMPLE_RATE as u64;

/// Frames carried by one on-wire audio block.
pub const FRAMES_PER_BLOCK: usize = 7;

/// Magic tag leading every audio block, big-endian on the wire.
pub const BLOCK_MAGIC: u16 = 0x07FF;

/// Bytes of block header preceding the samples (magic + frame counter).
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Fixed size of a MIDI bulk transfer in bytes (up to 128 events).
pub const USB_BULK_MIDI_SIZE: usize = 512;
