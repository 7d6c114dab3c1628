//! Configuration for the spectrogram ViT classifier.

use serde::{Deserialize, Serialize};
use specvit_core::{DeviceKind, VitError, VitResult};
use std::path::Path;

use crate::labels::LabelSet;

/// Construction-time parameters of [`crate::SpectrogramVit`].
///
/// Everything a model needs is fixed here; nothing is reconfigured after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitConfig {
    /// Number of input channels (e.g. 1 for mono, 2 for stereo spectrograms).
    pub in_channels: usize,

    /// Ordered label vocabulary. Logit `i` belongs to `labels[i]`.
    pub labels: Vec<String>,

    /// Number of mel bands. The input mel axis must match exactly.
    pub mels: usize,

    /// Model dimension.
    pub hidden_size: usize,

    /// Number of attention heads, must divide `hidden_size`.
    pub num_heads: usize,

    /// Number of transformer encoder layers.
    pub num_encoders: usize,

    /// Number of transformer decoder layers (ignored in encoder-only mode).
    pub num_decoders: usize,

    /// Dropout probability used in attention, feed-forward and the classifier.
    pub dropout_p: f32,

    /// Pool from the encoder output directly, without label decoding.
    #[serde(default)]
    pub use_encoder_only: bool,

    /// Prepend a learnable class token and pool from it.
    #[serde(default = "default_true")]
    pub use_learnable_token: bool,

    /// Positional encoding strategy; `None` disables it.
    #[serde(default)]
    pub positional_encoding: Option<PositionalEncodingConfig>,

    /// Where the parameters live.
    #[serde(default)]
    pub device: DeviceKind,

    /// Layer normalization epsilon.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Feed-forward width as a multiple of `hidden_size`.
    #[serde(default = "default_feedforward_multiplier")]
    pub feedforward_multiplier: usize,
}

fn default_true() -> bool {
    true
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

fn default_feedforward_multiplier() -> usize {
    4
}

/// Built-in positional encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionalEncodingConfig {
    /// Fixed sin/cos table.
    Sinusoidal { max_len: usize },
    /// Trainable table of `max_len` position vectors.
    Learned { max_len: usize },
}

impl PositionalEncodingConfig {
    pub fn max_len(&self) -> usize {
        match self {
            Self::Sinusoidal { max_len } | Self::Learned { max_len } => *max_len,
        }
    }
}

/// Which transformer body a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    EncoderOnly,
    EncoderDecoder,
}

impl VitConfig {
    /// Configuration with the given shape parameters and defaults for the rest:
    /// 4 encoder layers, 2 decoder layers, dropout 0.1, encoder-decoder body,
    /// class token enabled, no positional encoding, CPU.
    pub fn new<S: Into<String>>(
        in_channels: usize,
        labels: impl IntoIterator<Item = S>,
        mels: usize,
        hidden_size: usize,
        num_heads: usize,
    ) -> Self {
        Self {
            in_channels,
            labels: labels.into_iter().map(Into::into).collect(),
            mels,
            hidden_size,
            num_heads,
            num_encoders: 4,
            num_decoders: 2,
            dropout_p: 0.1,
            use_encoder_only: false,
            use_learnable_token: true,
            positional_encoding: None,
            device: DeviceKind::Cpu,
            layer_norm_eps: default_layer_norm_eps(),
            feedforward_multiplier: default_feedforward_multiplier(),
        }
    }

    pub fn with_layers(mut self, num_encoders: usize, num_decoders: usize) -> Self {
        self.num_encoders = num_encoders;
        self.num_decoders = num_decoders;
        self
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    pub fn with_encoder_only(mut self, use_encoder_only: bool) -> Self {
        self.use_encoder_only = use_encoder_only;
        self
    }

    pub fn with_learnable_token(mut self, use_learnable_token: bool) -> Self {
        self.use_learnable_token = use_learnable_token;
        self
    }

    pub fn with_positional_encoding(mut self, encoding: Option<PositionalEncodingConfig>) -> Self {
        self.positional_encoding = encoding;
        self
    }

    pub fn with_device(mut self, device: DeviceKind) -> Self {
        self.device = device;
        self
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> VitResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> VitResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every construction-time invariant.
    pub fn validate(&self) -> VitResult<()> {
        if self.hidden_size == 0 || self.num_heads == 0 {
            return Err(VitError::config("hidden_size and num_heads must be positive"));
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(VitError::config(format!(
                "hidden_size ({}) must be divisible by num_heads ({})",
                self.hidden_size, self.num_heads
            )));
        }
        if self.in_channels == 0 || self.mels == 0 {
            return Err(VitError::config("in_channels and mels must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(VitError::config(format!(
                "dropout_p must be in [0, 1), got {}",
                self.dropout_p
            )));
        }
        if self.feedforward_multiplier == 0 {
            return Err(VitError::config("feedforward_multiplier must be positive"));
        }
        LabelSet::new(self.labels.clone())?;

        match self.positional_encoding {
            Some(pe) if pe.max_len() == 0 => {
                return Err(VitError::config("positional encoding max_len must be positive"));
            }
            Some(PositionalEncodingConfig::Sinusoidal { .. }) if self.hidden_size % 2 != 0 => {
                return Err(VitError::config(
                    "sinusoidal positional encoding needs an even hidden_size",
                ));
            }
            Some(pe) if !self.use_encoder_only && pe.max_len() < self.labels.len() => {
                return Err(VitError::config(format!(
                    "positional encoding max_len ({}) is shorter than the label sequence ({})",
                    pe.max_len(),
                    self.labels.len()
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Feed-forward intermediate dimension.
    pub fn ffn_dim(&self) -> usize {
        self.hidden_size * self.feedforward_multiplier
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn body_kind(&self) -> BodyKind {
        if self.use_encoder_only {
            BodyKind::EncoderOnly
        } else {
            BodyKind::EncoderDecoder
        }
    }

    /// Number of trainable parameters a model built from this config holds.
    pub fn num_parameters(&self) -> usize {
        let h = self.hidden_size;
        let f = self.ffn_dim();
        let labels = self.num_labels();

        let attention = 4 * h * h + 4 * h;
        let feed_forward = h * f + f + f * h + h;
        let norm = 2 * h;

        let mut total = h * self.in_channels * self.mels + h;
        total += self.num_encoders * (attention + feed_forward + 2 * norm);
        if !self.use_encoder_only {
            total += labels * h;
            total += self.num_decoders * (2 * attention + feed_forward + 3 * norm);
        }
        if self.use_learnable_token {
            total += h;
        }
        if let Some(PositionalEncodingConfig::Learned { max_len }) = self.positional_encoding {
            total += max_len * h;
        }
        total + h * labels + labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> VitConfig {
        VitConfig::new(1, ["a", "b", "c"], 64, 128, 4)
    }

    #[test]
    fn test_defaults() {
        let config = base();
        assert!(config.use_learnable_token);
        assert!(!config.use_encoder_only);
        assert!(config.positional_encoding.is_none());
        assert_eq!(config.head_dim(), 32);
        assert_eq!(config.ffn_dim(), 512);
        assert_eq!(config.body_kind(), BodyKind::EncoderDecoder);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_head_mismatch_rejected() {
        let config = VitConfig::new(1, ["a", "b", "c"], 64, 128, 5);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, VitError::Config(msg) if msg.contains("divisible")));
    }

    #[test]
    fn test_empty_and_duplicate_labels_rejected() {
        let empty = VitConfig::new(1, Vec::<String>::new(), 64, 128, 4);
        assert!(matches!(empty.validate(), Err(VitError::Config(_))));

        let dup = VitConfig::new(1, ["a", "a"], 64, 128, 4);
        assert!(matches!(dup.validate(), Err(VitError::Config(_))));
    }

    #[test]
    fn test_dropout_range() {
        assert!(base().with_dropout(0.0).validate().is_ok());
        assert!(base().with_dropout(1.0).validate().is_err());
        assert!(base().with_dropout(-0.1).validate().is_err());
    }

    #[test]
    fn test_positional_encoding_checks() {
        let odd = VitConfig::new(1, ["a"], 8, 6, 3)
            .with_positional_encoding(Some(PositionalEncodingConfig::Learned { max_len: 16 }));
        assert!(odd.validate().is_ok());
        let odd = odd.with_positional_encoding(Some(PositionalEncodingConfig::Sinusoidal {
            max_len: 16,
        }));
        assert!(odd.validate().is_err());

        let short = base()
            .with_positional_encoding(Some(PositionalEncodingConfig::Sinusoidal { max_len: 2 }));
        assert!(short.validate().is_err());
        assert!(short.with_encoder_only(true).validate().is_ok());
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "in_channels": 2,
            "labels": ["speech", "music"],
            "mels": 64,
            "hidden_size": 64,
            "num_heads": 4,
            "num_encoders": 2,
            "num_decoders": 1,
            "dropout_p": 0.1,
            "positional_encoding": { "type": "sinusoidal", "max_len": 512 }
        }"#;
        let config = VitConfig::from_json_str(json).unwrap();
        assert!(config.use_learnable_token);
        assert!(!config.use_encoder_only);
        assert_eq!(config.device, DeviceKind::Cpu);
        assert_eq!(
            config.positional_encoding,
            Some(PositionalEncodingConfig::Sinusoidal { max_len: 512 })
        );
        assert_eq!(config.layer_norm_eps, 1e-5);
    }

    #[test]
    fn test_json_rejects_invalid() {
        let json = r#"{
            "in_channels": 1, "labels": [], "mels": 64, "hidden_size": 64,
            "num_heads": 4, "num_encoders": 1, "num_decoders": 1, "dropout_p": 0.1
        }"#;
        assert!(matches!(VitConfig::from_json_str(json), Err(VitError::Config(_))));
    }

    #[test]
    fn test_parameter_count_drops_decoder_when_encoder_only() {
        let full = base().with_layers(2, 2);
        let encoder_only = full.clone().with_encoder_only(true);
        assert!(encoder_only.num_parameters() < full.num_parameters());
    }
}
