//! Log-mel spectrogram extraction.
//!
//! Each channel of the input buffer is transformed independently and the
//! results are stacked into a `[1, channels, n_mels, time]` tensor, which is
//! the layout the classifier's merge projection consumes.

use candle_core::{Device, Tensor};
use rustfft::{num_complex::Complex, FftPlanner};
use specvit_core::{
    AudioBuffer, FeatureExtractorConfig, LogType, MelNormalization, MelScale, Spectrogram,
    VitError, VitResult,
};
use std::f32::consts::PI;
use tracing::debug;

use crate::loader::split_channels;

const LOG_FLOOR: f32 = 1e-10;

/// Параметризованный mel-экстрактор.
#[derive(Debug)]
pub struct MelSpectrogramExtractor {
    config: FeatureExtractorConfig,
    window: Vec<f32>,
    /// [n_mels][n_freqs]
    filters: Vec<Vec<f32>>,
}

impl MelSpectrogramExtractor {
    /// Создать mel-экстрактор с фильтрами, сгенерированными по конфигурации.
    pub fn new(config: FeatureExtractorConfig) -> VitResult<Self> {
        config.validate()?;
        let window = hann_window(config.n_fft);
        let filters = mel_filterbank(&config);
        Ok(Self {
            config,
            window,
            filters,
        })
    }

    pub fn config(&self) -> &FeatureExtractorConfig {
        &self.config
    }

    /// Extract a multi-channel log-mel spectrogram.
    ///
    /// The buffer must already be at `config.sample_rate`.
    pub fn extract(&self, buffer: &AudioBuffer, device: &Device) -> VitResult<Spectrogram> {
        if buffer.sample_rate != self.config.sample_rate {
            return Err(VitError::Audio(format!(
                "Expected {} Hz audio, got {} Hz (resample first)",
                self.config.sample_rate, buffer.sample_rate
            )));
        }
        if buffer.num_samples() == 0 {
            return Err(VitError::Audio("Cannot extract features from empty audio".to_string()));
        }

        let channels = split_channels(buffer);
        let n_mels = self.config.n_mels;
        let num_frames = self.num_frames(buffer.num_samples());

        // Layout [channel][mel][frame].
        let mut data = Vec::with_capacity(channels.len() * n_mels * num_frames);
        for samples in &channels {
            let frames = self.log_mel(samples);
            for m in 0..n_mels {
                data.extend(frames.iter().map(|frame| frame[m]));
            }
        }

        let tensor = Tensor::from_vec(data, (1, channels.len(), n_mels, num_frames), device)?;
        debug!(
            channels = channels.len(),
            n_mels,
            num_frames,
            "Extracted log-mel spectrogram"
        );
        Ok(Spectrogram::new(tensor, channels.len(), n_mels, num_frames))
    }

    /// Number of STFT frames for a signal of `num_samples` (centered framing).
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples / self.config.hop_length + 1
    }

    /// Log-mel frames of one channel, `[frame][mel]`.
    pub fn log_mel(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames: Vec<Vec<f32>> = self
            .power_spectrogram(samples)
            .iter()
            .map(|power| {
                self.filters
                    .iter()
                    .map(|filter| {
                        let energy: f32 = filter.iter().zip(power).map(|(w, p)| w * p).sum();
                        match self.config.log_type {
                            LogType::Log10 => energy.max(LOG_FLOOR).log10(),
                            LogType::Ln => energy.max(LOG_FLOOR).ln(),
                        }
                    })
                    .collect()
            })
            .collect();

        normalize(&mut frames, self.config.normalization);
        frames
    }

    /// Power spectrum per frame with reflect-padded centered windows.
    fn power_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n = samples.len() as isize;
        let half = (n_fft / 2) as isize;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        (0..self.num_frames(samples.len()))
            .map(|frame| {
                let start = (frame * hop) as isize - half;
                let mut buffer: Vec<Complex<f32>> = self
                    .window
                    .iter()
                    .enumerate()
                    .map(|(i, w)| {
                        let sample = reflect(start + i as isize, n)
                            .map(|idx| samples[idx])
                            .unwrap_or(0.0);
                        Complex::new(sample * w, 0.0)
                    })
                    .collect();
                fft.process(&mut buffer);
                buffer
                    .iter()
                    .take(self.config.n_freqs())
                    .map(|c| c.norm_sqr())
                    .collect()
            })
            .collect()
    }
}

/// Reflect-pad index lookup; `None` when the signal is too short to reflect.
fn reflect(idx: isize, len: isize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let mut idx = idx;
    if idx < 0 {
        idx = -idx;
    }
    if idx >= len {
        idx = 2 * len - idx - 2;
    }
    (0..len).contains(&idx).then_some(idx as usize)
}

fn values(frames: &[Vec<f32>]) -> impl Iterator<Item = f32> + '_ {
    frames.iter().flat_map(|f| f.iter().copied())
}

fn normalize(frames: &mut [Vec<f32>], normalization: MelNormalization) {
    match normalization {
        MelNormalization::DynamicRange => {
            let max = values(frames).fold(f32::NEG_INFINITY, f32::max);
            let floor = max - 8.0;
            for v in frames.iter_mut().flat_map(|f| f.iter_mut()) {
                *v = (v.max(floor) + 4.0) / 4.0;
            }
        }
        MelNormalization::PerUtterance => {
            let count = values(frames).count();
            if count == 0 {
                return;
            }
            let mean = values(frames).map(f64::from).sum::<f64>() / count as f64;
            let var = values(frames)
                .map(|v| (f64::from(v) - mean).powi(2))
                .sum::<f64>()
                / count as f64;
            let std = var.sqrt().max(1e-10);
            for v in frames.iter_mut().flat_map(|f| f.iter_mut()) {
                *v = ((f64::from(*v) - mean) / std) as f32;
            }
        }
        MelNormalization::None => {}
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / length as f32).cos()))
        .collect()
}

fn hz_to_mel(hz: f32, scale: MelScale) -> f32 {
    match scale {
        MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
        MelScale::Slaney => {
            let f_sp = 200.0 / 3.0;
            let min_log_hz = 1000.0;
            let logstep = 6.4f32.ln() / 27.0;
            if hz >= min_log_hz {
                min_log_hz / f_sp + (hz / min_log_hz).ln() / logstep
            } else {
                hz / f_sp
            }
        }
    }
}

fn mel_to_hz(mel: f32, scale: MelScale) -> f32 {
    match scale {
        MelScale::Htk => 700.0 * (10f32.powf(mel / 2595.0) - 1.0),
        MelScale::Slaney => {
            let f_sp = 200.0 / 3.0;
            let min_log_hz = 1000.0;
            let min_log_mel = min_log_hz / f_sp;
            let logstep = 6.4f32.ln() / 27.0;
            if mel >= min_log_mel {
                min_log_hz * (logstep * (mel - min_log_mel)).exp()
            } else {
                f_sp * mel
            }
        }
    }
}

/// Triangular filterbank with Slaney area normalisation, `[n_mels][n_freqs]`.
fn mel_filterbank(config: &FeatureExtractorConfig) -> Vec<Vec<f32>> {
    let n_freqs = config.n_freqs();
    let scale = config.mel_scale;
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * config.sample_rate as f32 / config.n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(config.f_min, scale);
    let mel_max = hz_to_mel(config.f_max, scale);
    let edges: Vec<f32> = (0..config.n_mels + 2)
        .map(|i| {
            let mel = mel_min + i as f32 * (mel_max - mel_min) / (config.n_mels + 1) as f32;
            mel_to_hz(mel, scale)
        })
        .collect();

    edges
        .windows(3)
        .map(|w| {
            let (left, center, right) = (w[0], w[1], w[2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - left) / (center - left);
                    let falling = (right - f) / (right - center);
                    enorm * rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: usize, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(400);
        assert_eq!(window.len(), 400);
        assert!(window[0].abs() < 1e-6);
        assert!((window[200] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for scale in [MelScale::Slaney, MelScale::Htk] {
            for hz in [300.0, 1000.0, 4000.0] {
                let back = mel_to_hz(hz_to_mel(hz, scale), scale);
                assert!((hz - back).abs() < 0.5, "{scale:?} {hz} -> {back}");
            }
        }
    }

    #[test]
    fn test_filterbank_shape_and_coverage() {
        let config = FeatureExtractorConfig::log_mel_64();
        let filters = mel_filterbank(&config);
        assert_eq!(filters.len(), 64);
        assert!(filters.iter().all(|f| f.len() == 201));
        assert!(filters.iter().all(|f| f.iter().sum::<f32>() > 0.0));
    }

    #[test]
    fn test_extract_stereo_layout() {
        let config = FeatureExtractorConfig::log_mel_64();
        let extractor = MelSpectrogramExtractor::new(config).unwrap();

        let left = sine(440.0, 16000, 0.5);
        let right = sine(2000.0, 16000, 0.5);
        let samples: Vec<f32> = left.iter().zip(&right).flat_map(|(l, r)| [*l, *r]).collect();
        let buffer = AudioBuffer::new(samples, 16000, 2);

        let spec = extractor.extract(&buffer, &Device::Cpu).unwrap();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.num_mels, 64);
        assert_eq!(spec.num_frames, 8000 / 160 + 1);
        assert_eq!(spec.tensor.dims(), &[1, 2, 64, 51]);
    }

    #[test]
    fn test_sine_energy_peaks_near_its_band() {
        let mut config = FeatureExtractorConfig::log_mel_64();
        config.normalization = MelNormalization::None;
        let extractor = MelSpectrogramExtractor::new(config.clone()).unwrap();

        let frames = extractor.log_mel(&sine(1000.0, 16000, 0.25));
        let mid = &frames[frames.len() / 2];
        let peak = mid
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        let target = hz_to_mel(1000.0, config.mel_scale);
        let mel_max = hz_to_mel(config.f_max, config.mel_scale);
        let mel_min = hz_to_mel(config.f_min, config.mel_scale);
        let step = (mel_max - mel_min) / (config.n_mels + 1) as f32;
        let expected = (target / step).round() as usize - 1;
        assert!(peak.abs_diff(expected) <= 1, "peak {peak}, expected ~{expected}");
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let extractor = MelSpectrogramExtractor::new(FeatureExtractorConfig::default()).unwrap();
        let buffer = AudioBuffer::new(vec![0.0; 4410], 44100, 1);
        assert!(matches!(
            extractor.extract(&buffer, &Device::Cpu),
            Err(VitError::Audio(_))
        ));
    }

    #[test]
    fn test_per_utterance_normalisation() {
        let extractor = MelSpectrogramExtractor::new(FeatureExtractorConfig::default()).unwrap();
        let frames = extractor.log_mel(&sine(440.0, 16000, 0.2));
        let values: Vec<f32> = frames.into_iter().flatten().collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 1e-3);
    }

    #[test]
    fn test_dynamic_range_clamp() {
        let config = FeatureExtractorConfig::whisper_128();
        let extractor = MelSpectrogramExtractor::new(config).unwrap();
        let frames = extractor.log_mel(&sine(440.0, 16000, 0.2));
        assert!(frames.iter().all(|f| f.len() == 128));
        let values: Vec<f32> = frames.into_iter().flatten().collect();
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        assert!(max - min <= 2.0 + 1e-5);
    }
}
