//! Framed audio block codec.
//!
//! The vendor alternate setting moves audio in fixed blocks: a 4-byte
//! header (big-endian magic `0x07FF`, big-endian running frame counter)
//! followed by [`FRAMES_PER_BLOCK`] frames of big-endian i32 samples,
//! channel-interleaved. The host side of the engine works in interleaved
//! little-endian f32, so the codec owns byte order, sample format, and
//! per-track gain in one pass.
//!
//! The int↔float normalization constant (`1 / i32::MAX`) lives inside the
//! codec: decoding with unity track scales is the inverse of encoding, and
//! the track scales stay plain per-channel gains on top of that.

use byteorder::{BigEndian, ByteOrder};

use crate::{BLOCK_HEADER_SIZE, BLOCK_MAGIC, FRAMES_PER_BLOCK};

/// On-wire length in bytes of one block carrying `channels` tracks.
pub const fn block_len(channels: usize) -> usize {
    BLOCK_HEADER_SIZE + 4 * FRAMES_PER_BLOCK * channels
}

/// Decodes device blocks into interleaved f32, applying per-track gain.
pub struct BlockDecoder {
    scales: Vec<f32>,
}

impl BlockDecoder {
    /// Create a decoder for a device exposing `scales.len()` tracks, with
    /// one gain per track.
    pub fn new(scales: &[f32]) -> Self {
        Self {
            scales: scales.to_vec(),
        }
    }

    /// Number of tracks per frame.
    #[inline]
    pub fn channels(&self) -> usize {
        self.scales.len()
    }

    /// Decode a whole transfer of blocks into `pcm`.
    ///
    /// `wire` must hold a whole number of blocks and `pcm` exactly
    /// `blocks × FRAMES_PER_BLOCK × channels` samples. Inbound headers are
    /// skipped; the device's frame counter is not consulted here.
    pub fn decode(&self, wire: &[u8], pcm: &mut [f32]) {
        let channels = self.scales.len();
        let block = block_len(channels);
        debug_assert_eq!(wire.len() % block, 0);
        debug_assert_eq!(pcm.len(), wire.len() / block * FRAMES_PER_BLOCK * channels);

        let mut out = 0;
        for wire_block in wire.chunks_exact(block) {
            let samples = &wire_block[BLOCK_HEADER_SIZE..];
            for frame in samples.chunks_exact(4 * channels) {
                for (track, raw) in frame.chunks_exact(4).enumerate() {
                    let sample = BigEndian::read_i32(raw);
                    pcm[out] = (sample as f64 / i32::MAX as f64) as f32 * self.scales[track];
                    out += 1;
                }
            }
        }
    }
}

/// Encodes interleaved f32 into device blocks, stamping the frame counter.
///
/// The counter is 16 bits and wraps; the device uses it to spot dropped
/// transfers, not as an absolute position.
pub struct BlockEncoder {
    channels: usize,
    frames: u16,
}

impl BlockEncoder {
    /// Create an encoder producing blocks of `channels` tracks per frame.
    pub fn new(channels: usize) -> Self {
        Self { channels, frames: 0 }
    }

    /// Current value of the running frame counter.
    #[inline]
    pub fn frames(&self) -> u16 {
        self.frames
    }

    /// Encode a whole transfer of blocks from `pcm` into `wire`.
    ///
    /// Each block is stamped with the running counter, which advances by
    /// [`FRAMES_PER_BLOCK`] per block, wrapping mod 2^16. Samples are
    /// converted in f64 and clamped by the saturating float→int cast, so
    /// +1.0 encodes as `0x7FFFFFFF` and −1.0 as `0x80000001`.
    pub fn encode(&mut self, pcm: &[f32], wire: &mut [u8]) {
        let block = block_len(self.channels);
        debug_assert_eq!(wire.len() % block, 0);
        debug_assert_eq!(pcm.len(), wire.len() / block * FRAMES_PER_BLOCK * self.channels);

        let samples_per_block = FRAMES_PER_BLOCK * self.channels;
        for (i, wire_block) in wire.chunks_exact_mut(block).enumerate() {
            BigEndian::write_u16(&mut wire_block[0..2], BLOCK_MAGIC);
            BigEndian::write_u16(&mut wire_block[2..4], self.frames);
            self.frames = self.frames.wrapping_add(FRAMES_PER_BLOCK as u16);

            let pcm_block = &pcm[i * samples_per_block..(i + 1) * samples_per_block];
            let samples = &mut wire_block[BLOCK_HEADER_SIZE..];
            for (raw, &sample) in samples.chunks_exact_mut(4).zip(pcm_block) {
                let quantized = (sample as f64 * i32::MAX as f64) as i32;
                BigEndian::write_i32(raw, quantized);
            }
        }
    }
}
