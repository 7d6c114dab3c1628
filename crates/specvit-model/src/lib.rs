//! # specvit-model
//!
//! Vision-Transformer-style classifier for spectrogram input.
//!
//! This crate implements the model and its building blocks:
//! - Merge projection: Conv2D over all mel bands, one token per time step
//! - Pluggable positional encoding (sinusoidal, learned, or caller-supplied)
//! - Optional learnable class token
//! - Encoder-only or encoder-decoder Transformer body
//! - Dropout + linear classifier producing per-label logits
//!
//! Input `[batch, channels, mels, steps]`, output `[batch, num_labels]`.

pub mod attention;
pub mod config;
pub mod labels;
pub mod layers;
pub mod model;
pub mod position;
pub mod projection;

pub use config::{BodyKind, PositionalEncodingConfig, VitConfig};
pub use labels::{LabelSet, Prediction};
pub use model::{count_parameters, Body, SpectrogramVit};
pub use position::{LearnedPositionalEncoding, SinusoidalPositionalEncoding};
