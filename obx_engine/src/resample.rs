//! Fallback stretcher for outbound underflow.
//!
//! When the host ring cannot cover a whole outbound transfer, the mover
//! stretches whatever whole frames are available to the full transfer
//! length in one shot. It is a rare flow-control event, so the stretch
//! trades quality for simplicity: the resampler is built per call and its
//! group delay is not compensated. The seam is a single trait so
//! constrained builds can swap the sinc kernel for linear interpolation.

#[cfg(feature = "sinc")]
use log::debug;

/// One-shot stretcher from `in_frames` to exactly `out_frames`.
pub(crate) trait Stretcher: Send {
    /// Stretch `in_frames` interleaved frames of `input` into `output`,
    /// which holds exactly `out_frames` frames. Frames the kernel does not
    /// produce are zeroed. Returns the frames produced before padding.
    fn stretch(&mut self, input: &[f32], in_frames: usize, out_frames: usize, output: &mut [f32]) -> usize;
}

/// Stretcher used by default: sinc when the `sinc` feature is on.
#[cfg(feature = "sinc")]
pub(crate) fn default_stretcher(channels: usize) -> Box<dyn Stretcher> {
    Box::new(SincStretcher::new(channels))
}

#[cfg(not(feature = "sinc"))]
pub(crate) fn default_stretcher(channels: usize) -> Box<dyn Stretcher> {
    Box::new(LinearStretcher::new(channels))
}

/// Sinc-kernel stretcher backed by rubato, fastest-profile parameters.
#[cfg(feature = "sinc")]
pub(crate) struct SincStretcher {
    channels: usize,
    planar_in: Vec<Vec<f32>>,
}

#[cfg(feature = "sinc")]
impl SincStretcher {
    pub(crate) fn new(channels: usize) -> Self {
        Self {
            channels,
            planar_in: vec![Vec::new(); channels],
        }
    }
}

#[cfg(feature = "sinc")]
impl Stretcher for SincStretcher {
    fn stretch(&mut self, input: &[f32], in_frames: usize, out_frames: usize, output: &mut [f32]) -> usize {
        use rubato::{
            Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
        };

        debug_assert_eq!(input.len(), in_frames * self.channels);
        debug_assert_eq!(output.len(), out_frames * self.channels);

        output.fill(0.0);
        if in_frames == 0 {
            return 0;
        }

        for plane in &mut self.planar_in {
            plane.clear();
        }
        for frame in input.chunks_exact(self.channels) {
            for (plane, &sample) in self.planar_in.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }

        let ratio = out_frames as f64 / in_frames as f64;
        let params = SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.91,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::Hann2,
        };

        let mut resampler = match SincFixedIn::<f32>::new(ratio, 1.1, params, in_frames, self.channels) {
            Ok(resampler) => resampler,
            Err(e) => {
                debug!("stretch setup failed ({e}), leaving silence");
                return 0;
            }
        };

        let planar_out = match resampler.process(&self.planar_in, None) {
            Ok(planar_out) => planar_out,
            Err(e) => {
                debug!("stretch failed ({e}), leaving silence");
                return 0;
            }
        };

        let produced = planar_out.first().map_or(0, Vec::len).min(out_frames);
        if produced < out_frames {
            debug!("stretch produced {produced} of {out_frames} frames");
        }
        for (i, frame) in output.chunks_exact_mut(self.channels).enumerate().take(produced) {
            for (sample, plane) in frame.iter_mut().zip(&planar_out) {
                *sample = plane[i];
            }
        }
        produced
    }
}

/// Linear-interpolation stretcher for builds without the sinc kernel.
pub(crate) struct LinearStretcher {
    channels: usize,
}

impl LinearStretcher {
    pub(crate) fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl Stretcher for LinearStretcher {
    fn stretch(&mut self, input: &[f32], in_frames: usize, out_frames: usize, output: &mut [f32]) -> usize {
        debug_assert_eq!(input.len(), in_frames * self.channels);
        debug_assert_eq!(output.len(), out_frames * self.channels);

        output.fill(0.0);
        if in_frames == 0 {
            return 0;
        }

        let step = if out_frames > 1 {
            (in_frames - 1) as f64 / (out_frames - 1) as f64
        } else {
            0.0
        };

        for (j, frame) in output.chunks_exact_mut(self.channels).enumerate() {
            let pos = j as f64 * step;
            let i0 = pos as usize;
            let i1 = (i0 + 1).min(in_frames - 1);
            let frac = (pos - i0 as f64) as f32;

            for (k, sample) in frame.iter_mut().enumerate() {
                let a = input[i0 * self.channels + k];
                let b = input[i1 * self.channels + k];
                *sample = a + (b - a) * frac;
            }
        }
        out_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_stretch_ramp() {
        let mut stretcher = LinearStretcher::new(1);
        let input = [0.0f32, 1.0, 2.0, 3.0];
        let mut output = [0.0f32; 7];

        assert_eq!(stretcher.stretch(&input, 4, 7, &mut output), 7);

        assert_eq!(output[0], 0.0);
        assert_eq!(output[6], 3.0);
        for pair in output.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_linear_stretch_interleaved_keeps_channels_apart() {
        let mut stretcher = LinearStretcher::new(2);
        // Left constant 1.0, right constant -1.0
        let input: Vec<f32> = (0..8).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let mut output = vec![0.0f32; 16];

        stretcher.stretch(&input, 4, 8, &mut output);

        for frame in output.chunks_exact(2) {
            assert!((frame[0] - 1.0).abs() < 1e-6);
            assert!((frame[1] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_input_leaves_silence() {
        let mut stretcher = LinearStretcher::new(2);
        let mut output = vec![1.0f32; 12];
        assert_eq!(stretcher.stretch(&[], 0, 6, &mut output), 0);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[cfg(feature = "sinc")]
    #[test]
    fn test_sinc_stretch_fills_output() {
        let mut stretcher = SincStretcher::new(2);
        let in_frames = 28;
        let out_frames = 56;
        let input: Vec<f32> = (0..in_frames * 2)
            .map(|i| ((i / 2) as f32 * 0.35).sin() * 0.5)
            .collect();
        let mut output = vec![f32::NAN; out_frames * 2];

        let produced = stretcher.stretch(&input, in_frames, out_frames, &mut output);

        assert!(produced > 0);
        assert!(output.iter().all(|s| s.is_finite()));
    }
}
