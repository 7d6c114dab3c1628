//! WAV file loading.

use hound::WavReader;
use specvit_core::{AudioBuffer, VitError, VitResult};
use std::path::Path;
use tracing::debug;

/// Load a WAV file and return an interleaved AudioBuffer.
pub fn load_wav(path: impl AsRef<Path>) -> VitResult<AudioBuffer> {
    let path = path.as_ref();
    let reader =
        WavReader::open(path).map_err(|e| VitError::Audio(format!("Failed to open WAV: {}", e)))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate as usize;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VitError::Audio(format!("Failed to read samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| VitError::Audio(format!("Failed to read samples: {}", e)))?
        }
    };

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "Loaded WAV"
    );
    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// Downmix to mono by averaging channels.
pub fn to_mono(buffer: &AudioBuffer) -> AudioBuffer {
    if buffer.channels <= 1 {
        return buffer.clone();
    }

    let mono_samples: Vec<f32> = buffer
        .samples
        .chunks(buffer.channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    AudioBuffer::new(mono_samples, buffer.sample_rate, 1)
}

/// De-interleave into one sample vector per channel.
pub fn split_channels(buffer: &AudioBuffer) -> Vec<Vec<f32>> {
    if buffer.channels <= 1 {
        return vec![buffer.samples.clone()];
    }

    let mut out = vec![Vec::with_capacity(buffer.num_samples()); buffer.channels];
    for frame in buffer.samples.chunks_exact(buffer.channels) {
        for (channel, &sample) in out.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    out
}

/// Собрать interleaved-буфер из отдельных каналов равной длины.
pub fn interleave(channels: &[Vec<f32>], sample_rate: usize) -> VitResult<AudioBuffer> {
    let len = channels.first().map(Vec::len).unwrap_or(0);
    if channels.iter().any(|c| c.len() != len) {
        return Err(VitError::Audio(
            "Cannot interleave channels of different lengths".to_string(),
        ));
    }
    let mut samples = Vec::with_capacity(len * channels.len());
    for i in 0..len {
        samples.extend(channels.iter().map(|c| c[i]));
    }
    Ok(AudioBuffer::new(samples, sample_rate, channels.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono() {
        // Stereo buffer: L=1.0, R=0.0, L=0.5, R=0.5
        let stereo = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 16000, 2);
        let mono = to_mono(&stereo);

        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.5).abs() < 1e-6);
        assert!((mono.samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_split_and_interleave() {
        let stereo = AudioBuffer::new(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 8000, 2);
        let channels = split_channels(&stereo);
        assert_eq!(channels, vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]]);

        let back = interleave(&channels, 8000).unwrap();
        assert_eq!(back.samples, stereo.samples);
        assert_eq!(back.channels, 2);
    }

    #[test]
    fn test_interleave_rejects_ragged() {
        let err = interleave(&[vec![0.0; 3], vec![0.0; 2]], 8000);
        assert!(matches!(err, Err(VitError::Audio(_))));
    }
}
