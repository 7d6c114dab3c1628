//! Конфигурация mel-экстрактора.

use serde::{Deserialize, Serialize};

use crate::error::{VitError, VitResult};

/// Конфигурация mel-спектрограммы.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractorConfig {
    /// Целевая частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Размер окна FFT.
    pub n_fft: usize,

    /// Шаг между фреймами.
    pub hop_length: usize,

    /// Количество mel-бинов. Должно совпадать с `mels` модели.
    pub n_mels: usize,

    /// Минимальная частота для mel-фильтра.
    pub f_min: f32,

    /// Максимальная частота для mel-фильтра.
    pub f_max: f32,

    /// Шкала mel-фильтров.
    #[serde(default = "default_mel_scale")]
    pub mel_scale: MelScale,

    /// Тип логарифма для mel-спектрограммы.
    #[serde(default = "default_log_type")]
    pub log_type: LogType,

    /// Тип нормализации mel-спектрограммы.
    #[serde(default = "default_normalization")]
    pub normalization: MelNormalization,
}

fn default_mel_scale() -> MelScale {
    MelScale::Slaney
}

fn default_log_type() -> LogType {
    LogType::Ln
}

fn default_normalization() -> MelNormalization {
    MelNormalization::PerUtterance
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self::log_mel_64()
    }
}

impl FeatureExtractorConfig {
    /// 64 mel bins, 25 ms window / 10 ms hop at 16 kHz, ln + per-utterance norm.
    pub fn log_mel_64() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 400,
            hop_length: 160,
            n_mels: 64,
            f_min: 0.0,
            f_max: 8000.0,
            mel_scale: MelScale::Slaney,
            log_type: LogType::Ln,
            normalization: MelNormalization::PerUtterance,
        }
    }

    /// Whisper-совместимая конфигурация (128 mel bins, log10, dynamic range).
    pub fn whisper_128() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 400,
            hop_length: 160,
            n_mels: 128,
            f_min: 0.0,
            f_max: 8000.0,
            mel_scale: MelScale::Slaney,
            log_type: LogType::Log10,
            normalization: MelNormalization::DynamicRange,
        }
    }

    /// Same settings with a different number of mel bins.
    pub fn with_n_mels(mut self, n_mels: usize) -> Self {
        self.n_mels = n_mels;
        self
    }

    /// Количество частотных бинов одностороннего спектра.
    pub fn n_freqs(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Проверка согласованности параметров.
    pub fn validate(&self) -> VitResult<()> {
        if self.n_fft == 0 || self.hop_length == 0 || self.n_mels == 0 {
            return Err(VitError::config(
                "n_fft, hop_length and n_mels must be positive",
            ));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.f_min >= 0.0 && self.f_min < self.f_max && self.f_max <= nyquist) {
            return Err(VitError::config(format!(
                "mel range [{}, {}] must lie within [0, {nyquist}]",
                self.f_min, self.f_max
            )));
        }
        Ok(())
    }
}

/// Шкала mel-фильтров.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelScale {
    /// Slaney: линейная ниже 1000 Гц, логарифмическая выше (librosa по умолчанию).
    Slaney,
    /// HTK: полностью логарифмическая шкала.
    Htk,
}

/// Тип логарифма для mel-спектрограммы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Log10,
    Ln,
}

/// Тип нормализации mel-спектрограммы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelNormalization {
    /// Dynamic range compression: clamp to max-8, then (x+4)/4.
    DynamicRange,
    /// Per-utterance: вычитание среднего, деление на стандартное отклонение.
    PerUtterance,
    /// Без нормализации.
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeatureExtractorConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.n_mels, 64);
        assert_eq!(config.n_freqs(), 201);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_whisper_preset() {
        let config = FeatureExtractorConfig::whisper_128();
        assert_eq!(config.n_mels, 128);
        assert_eq!(config.log_type, LogType::Log10);
        assert!(config.validate().is_ok());
        assert_eq!(config.with_n_mels(80).n_mels, 80);
    }

    #[test]
    fn test_rejects_range_above_nyquist() {
        let mut config = FeatureExtractorConfig::default();
        config.f_max = 12000.0;
        assert!(matches!(config.validate(), Err(VitError::Config(_))));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "sample_rate": 22050,
            "n_fft": 1024,
            "hop_length": 256,
            "n_mels": 80,
            "f_min": 0.0,
            "f_max": 11025.0
        }"#;
        let config: FeatureExtractorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mel_scale, MelScale::Slaney);
        assert_eq!(config.normalization, MelNormalization::PerUtterance);
        assert!(config.validate().is_ok());
    }
}
