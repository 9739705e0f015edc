//! Sample-rate conversion between device and wire formats.
//!
//! Wraps a fixed-input-chunk rubato resampler behind a streaming interface:
//! callers push arbitrarily sized i16 buffers, full chunks are converted,
//! the remainder is carried to the next call.

use crate::error::{Result, VoicelinkError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Input chunk size in frames fed to the inner resampler.
const CHUNK_FRAMES: usize = 1024;

/// One-direction streaming resampler (mono).
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    pending: Vec<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let inner = SincFixedIn::new(
            output_rate as f64 / input_rate as f64,
            2.0,
            params,
            CHUNK_FRAMES,
            1,
        )
        .map_err(|e| VoicelinkError::Audio {
            message: format!("resampler {input_rate}->{output_rate}: {e}"),
        })?;

        Ok(Self {
            inner,
            pending: Vec::new(),
            input_rate,
            output_rate,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Converts as much of `pcm` as fills whole chunks; the tail is buffered
    /// for the next call.
    pub fn process(&mut self, pcm: &[i16]) -> Result<Vec<i16>> {
        self.pending
            .extend(pcm.iter().map(|&s| f32::from(s) / 32768.0));

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_FRAMES {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_FRAMES).collect();
            let waves = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| VoicelinkError::Audio {
                    message: format!("resample failed: {e}"),
                })?;
            if let Some(wave) = waves.into_iter().next() {
                output.extend(
                    wave.iter()
                        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                );
            }
        }
        Ok(output)
    }
}
