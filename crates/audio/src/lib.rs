//! # audio
//!
//! Audio frontend for SpecViT.
//!
//! This crate handles:
//! - WAV file loading and channel handling
//! - Audio resampling to the model's sample rate
//! - Multi-channel log-mel spectrogram extraction in `[1, channels, n_mels, time]` layout

pub mod loader;
pub mod mel;
pub mod resample;

pub use loader::{load_wav, split_channels, to_mono};
pub use mel::MelSpectrogramExtractor;
pub use resample::Resampler;
