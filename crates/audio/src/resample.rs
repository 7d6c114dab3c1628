//! Audio resampling.

use rubato::{FftFixedInOut, Resampler as RubatoResampler};
use specvit_core::{AudioBuffer, VitError, VitResult};

use crate::loader::{interleave, split_channels};

const CHUNK_SIZE: usize = 1024;

/// Audio resampler for converting sample rates.
pub struct Resampler {
    target_sample_rate: usize,
}

impl Resampler {
    /// Create a new resampler with target sample rate.
    pub fn new(target_sample_rate: usize) -> Self {
        Self { target_sample_rate }
    }

    /// Resample every channel of `buffer` to the target sample rate.
    pub fn resample(&self, buffer: &AudioBuffer) -> VitResult<AudioBuffer> {
        if buffer.sample_rate == self.target_sample_rate {
            return Ok(buffer.clone());
        }
        if buffer.channels == 0 {
            return Err(VitError::Audio("Buffer has no channels".to_string()));
        }

        let channels = split_channels(buffer);
        let num_samples = buffer.num_samples();
        let ratio = self.target_sample_rate as f64 / buffer.sample_rate as f64;
        let expected_len = (num_samples as f64 * ratio).round() as usize;

        let mut resampler = FftFixedInOut::<f32>::new(
            buffer.sample_rate,
            self.target_sample_rate,
            CHUNK_SIZE,
            channels.len(),
        )
        .map_err(|e| VitError::Audio(format!("Failed to create resampler: {}", e)))?;

        // FftFixedInOut may round the chunk size; ask it what it wants.
        let chunk_in = resampler.input_frames_next();
        let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_len); channels.len()];

        let mut pos = 0;
        while pos < num_samples {
            let end = (pos + chunk_in).min(num_samples);
            let input: Vec<Vec<f32>> = channels
                .iter()
                .map(|c| {
                    let mut chunk = c[pos..end].to_vec();
                    chunk.resize(chunk_in, 0.0);
                    chunk
                })
                .collect();
            let processed = resampler
                .process(&input, None)
                .map_err(|e| VitError::Audio(format!("Resampling failed: {}", e)))?;
            for (out, chunk) in output.iter_mut().zip(processed) {
                out.extend_from_slice(&chunk);
            }
            pos = end;
        }

        // Zero padding of the last chunk produces a tail we do not want.
        for out in &mut output {
            out.truncate(expected_len);
        }

        interleave(&output, self.target_sample_rate)
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(16000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_no_change() {
        let buffer = AudioBuffer::new(vec![0.0; 1024], 16000, 1);
        let resampler = Resampler::new(16000);
        let result = resampler.resample(&buffer).unwrap();

        assert_eq!(result.sample_rate, 16000);
        assert_eq!(result.samples.len(), buffer.samples.len());
    }

    #[test]
    fn test_downsample_stereo_keeps_channels() {
        let buffer = AudioBuffer::new(vec![0.25; 2 * 32000], 32000, 2);
        let result = Resampler::new(16000).resample(&buffer).unwrap();

        assert_eq!(result.channels, 2);
        assert_eq!(result.sample_rate, 16000);
        assert_eq!(result.num_samples(), 16000);
    }
}
