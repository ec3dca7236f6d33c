//! Audio movers: wire transfers in and out of the host rings.
//!
//! Both directions run on the USB worker at transfer completion. Inbound
//! feeds the clock-recovery filter, decodes, and publishes whole transfers
//! only; outbound reads whole transfers when it can, stretches what is
//! there on underflow, and always leaves a fully packed wire buffer.
//! Ring overflow and underflow are flow control here, not errors.

use log::warn;
use obx_core::ring::{RingReader, RingWriter};
use obx_wire::{BlockDecoder, BlockEncoder};

use crate::device::DeviceDesc;
use crate::resample::{Stretcher, default_stretcher};
use crate::state::{EngineShared, Status};
use crate::transfer::TransferLayout;

/// View of an interleaved f32 buffer as ring bytes.
#[inline]
fn as_bytes(pcm: &[f32]) -> &[u8] {
    // SAFETY: f32 has no invalid bit patterns and no padding; the length
    // covers exactly the same region.
    unsafe { core::slice::from_raw_parts(pcm.as_ptr() as *const u8, pcm.len() * 4) }
}

/// Mutable view of an interleaved f32 buffer as ring bytes.
#[inline]
fn as_bytes_mut(pcm: &mut [f32]) -> &mut [u8] {
    // SAFETY: as above; every bit pattern read back is a valid f32.
    unsafe { core::slice::from_raw_parts_mut(pcm.as_mut_ptr() as *mut u8, pcm.len() * 4) }
}

/// Per-engine audio state: host-domain buffers, codec pair, resync flag.
pub(crate) struct AudioIo {
    layout: TransferLayout,
    decoder: BlockDecoder,
    encoder: BlockEncoder,
    /// Device-to-host transfer, decoded and scaled.
    o2p_buf: Vec<f32>,
    /// Host-to-device transfer, as read (or stretched) from the ring.
    p2o_buf: Vec<f32>,
    /// Underflow scratch: whatever whole frames the ring could supply.
    resampler_buf: Vec<f32>,
    /// Set once the host has supplied a full transfer since the last idle;
    /// cleared to force a drain-resync on the next refill.
    reading_at_p2o_end: bool,
    stretcher: Box<dyn Stretcher>,
}

impl AudioIo {
    pub(crate) fn new(desc: &DeviceDesc, layout: TransferLayout) -> Self {
        Self::with_stretcher(desc, layout, default_stretcher(desc.inputs))
    }

    pub(crate) fn with_stretcher(
        desc: &DeviceDesc,
        layout: TransferLayout,
        stretcher: Box<dyn Stretcher>,
    ) -> Self {
        Self {
            layout,
            decoder: BlockDecoder::new(desc.output_track_scales),
            encoder: BlockEncoder::new(desc.inputs),
            o2p_buf: vec![0.0; layout.frames_per_transfer * desc.outputs],
            p2o_buf: vec![0.0; layout.frames_per_transfer * desc.inputs],
            resampler_buf: vec![0.0; layout.frames_per_transfer * desc.inputs],
            reading_at_p2o_end: false,
            stretcher,
        }
    }

    /// Boot-time reset: silence in both directions, resync armed.
    pub(crate) fn reset(&mut self) {
        self.o2p_buf.fill(0.0);
        self.p2o_buf.fill(0.0);
        self.reading_at_p2o_end = false;
    }

    /// Zero the outbound staging buffer so a later activation does not
    /// replay stale audio.
    pub(crate) fn clear_p2o(&mut self) {
        self.p2o_buf.fill(0.0);
        self.reading_at_p2o_end = false;
    }

    /// Inbound cycle: an audio-in transfer completed.
    ///
    /// Feeds the clock-recovery filter, decodes into the staging buffer
    /// regardless of state (keeping block alignment across Wait), and
    /// publishes the whole transfer to the ring only in Run, only when it
    /// fits.
    pub(crate) fn on_audio_in(
        &mut self,
        wire: &[u8],
        shared: &EngineShared,
        ring: Option<&mut (dyn RingWriter + 'static)>,
        now: f64,
    ) {
        let status = shared.clock_tick(self.layout.frames_per_transfer, now);

        self.decoder.decode(wire, &mut self.o2p_buf);

        if status < Status::Run {
            return;
        }
        let Some(ring) = ring else {
            return;
        };

        shared.note_o2p_latency(ring.read_space());

        if ring.write_space() >= self.layout.o2p_transfer_size {
            ring.write(as_bytes(&self.o2p_buf));
        } else {
            warn!("o2p: audio ring overflow, dropping one transfer");
        }
    }

    /// Outbound cycle: stage one transfer's worth of host audio and pack
    /// it onto the wire.
    ///
    /// With the path disabled (by option or at runtime) the wire carries
    /// silence and the resync flag re-arms. On underflow the available
    /// whole frames are stretched to the full transfer length.
    pub(crate) fn fill_audio_out(
        &mut self,
        shared: &EngineShared,
        ring: Option<&mut (dyn RingReader + 'static)>,
        wire: &mut [u8],
    ) {
        match ring {
            Some(ring) if shared.p2o_audio_enabled() => {
                let space = ring.read_space();
                shared.note_p2o_latency(space);
                self.stage_from_ring(ring, space);
            }
            _ => {
                self.reading_at_p2o_end = false;
                self.p2o_buf.fill(0.0);
            }
        }

        self.encoder.encode(&self.p2o_buf, wire);
    }

    fn stage_from_ring(&mut self, ring: &mut dyn RingReader, space: usize) {
        let transfer = self.layout.p2o_transfer_size;
        let frame = self.layout.p2o_frame_size;

        if !self.reading_at_p2o_end {
            if space >= transfer {
                // The host has caught up after an idle stretch; throw the
                // backlog away so the next cycle starts frame-aligned.
                ring.discard(space - space % frame);
                self.reading_at_p2o_end = true;
            }
            return;
        }

        if space >= transfer {
            ring.read(as_bytes_mut(&mut self.p2o_buf));
            return;
        }

        // Underflow: stretch what is there to a full transfer.
        let available_frames = space / frame;
        if available_frames == 0 {
            self.p2o_buf.fill(0.0);
            return;
        }

        let samples = available_frames * self.layout.inputs;
        ring.read(as_bytes_mut(&mut self.resampler_buf[..samples]));
        warn!(
            "p2o: audio ring underflow, stretching {available_frames} frames to {}",
            self.layout.frames_per_transfer
        );
        self.stretcher.stretch(
            &self.resampler_buf[..samples],
            available_frames,
            self.layout.frames_per_transfer,
            &mut self.p2o_buf,
        );
    }

    #[cfg(test)]
    pub(crate) fn o2p_buf(&self) -> &[f32] {
        &self.o2p_buf
    }

    #[cfg(test)]
    pub(crate) fn p2o_buf(&self) -> &[f32] {
        &self.p2o_buf
    }
}
