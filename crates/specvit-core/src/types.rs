//! Общие типы для SpecViT.
//!
//! Буферы аудио и спектрограммы в формате, который ожидает модель.

use candle_core::Tensor;

// ---------------------------------------------------------------------------
// Аудио-буфер
// ---------------------------------------------------------------------------

/// Буфер необработанного аудио (сэмплы чередуются по каналам).
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Аудио-сэмплы (нормализованы к [-1.0, 1.0]).
    pub samples: Vec<f32>,

    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Количество каналов.
    pub channels: usize,
}

impl AudioBuffer {
    /// Создать новый буфер аудио.
    pub fn new(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Длительность в секундах.
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate * self.channels) as f32
    }

    /// Количество сэмплов на канал.
    pub fn num_samples(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

// ---------------------------------------------------------------------------
// Спектрограмма
// ---------------------------------------------------------------------------

/// Mel-спектрограмма в раскладке модели.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Тензор формы [1, channels, n_mels, time].
    pub tensor: Tensor,

    /// Количество каналов.
    pub channels: usize,

    /// Количество mel-бинов.
    pub num_mels: usize,

    /// Количество временных фреймов.
    pub num_frames: usize,
}

impl Spectrogram {
    pub fn new(tensor: Tensor, channels: usize, num_mels: usize, num_frames: usize) -> Self {
        Self {
            tensor,
            channels,
            num_mels,
            num_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_buffer_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 32000], 16000, 2);
        assert_eq!(buffer.num_samples(), 16000);
        assert!((buffer.duration() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioBuffer::new(Vec::new(), 16000, 0);
        assert_eq!(buffer.num_samples(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }
}
