//! Spectrogram Vision Transformer classifier.

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{embedding, linear, Dropout, Embedding, Linear, Module, ModuleT, VarBuilder, VarMap};
use specvit_core::{PositionalEncoding, VitError, VitResult};
use tracing::{debug, debug_span, trace};

use crate::config::{BodyKind, VitConfig};
use crate::labels::LabelSet;
use crate::layers::{TransformerDecoder, TransformerEncoder};
use crate::position::build_positional_encoding;
use crate::projection::MergeProjection;

/// Transformer body, fixed at construction.
#[derive(Debug, Clone)]
pub enum Body {
    /// Pool position 0 of the encoder output.
    EncoderOnly(TransformerEncoder),
    /// Label embeddings cross-attend to the encoder output; pool position 0
    /// of the decoder output.
    EncoderDecoder {
        encoder: TransformerEncoder,
        decoder: TransformerDecoder,
        label_embedding: Embedding,
    },
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::EncoderOnly(_) => BodyKind::EncoderOnly,
            Body::EncoderDecoder { .. } => BodyKind::EncoderDecoder,
        }
    }
}

/// Dropout followed by a linear projection to label logits.
///
/// Weights live under `classifier.1` (index 0 is the parameter-free dropout).
#[derive(Debug, Clone)]
struct ClassifierHead {
    dropout: Dropout,
    linear: Linear,
}

impl ClassifierHead {
    fn new(config: &VitConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            dropout: Dropout::new(config.dropout_p),
            linear: linear(config.hidden_size, config.num_labels(), vb.pp("1"))?,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.linear.forward(&self.dropout.forward_t(xs, train)?)
    }
}

/// ViT-style classifier over `[batch, channels, mels, steps]` spectrograms.
///
/// Pipeline:
/// 1. Merge projection (conv over all mel bands, one token per time step)
/// 2. Optional positional encoding
/// 3. Optional learnable class token at position 0
/// 4. Encoder-only or encoder-decoder body
/// 5. Dropout + linear classifier on the pooled position-0 representation
///
/// Parameter names follow the PyTorch module tree (`merge_mels.0`, `encoder`,
/// `decoder`, `labels_embedding`, `cls`, `classifier.1`), so exported
/// safetensors load as-is.
#[derive(Debug, Clone)]
pub struct SpectrogramVit {
    config: VitConfig,
    labels: LabelSet,
    merge_projection: MergeProjection,
    positional_encoding: Option<Arc<dyn PositionalEncoding>>,
    class_token: Option<Embedding>,
    body: Body,
    classifier: ClassifierHead,
    device: Device,
    dtype: DType,
}

impl SpectrogramVit {
    /// Build the model from `config`, taking weights from `vb`.
    pub fn new(config: VitConfig, vb: VarBuilder) -> VitResult<Self> {
        config.validate()?;
        let labels = LabelSet::new(config.labels.clone())?;
        let h = config.hidden_size;

        let merge_projection = MergeProjection::new(&config, vb.pp("merge_mels").pp("0"))?;
        let positional_encoding =
            build_positional_encoding(&config, vb.pp("positional_encoding"))?;
        let class_token = if config.use_learnable_token {
            Some(embedding(1, h, vb.pp("cls"))?)
        } else {
            None
        };

        let encoder = TransformerEncoder::new(&config, vb.pp("encoder"))?;
        let body = if config.use_encoder_only {
            Body::EncoderOnly(encoder)
        } else {
            Body::EncoderDecoder {
                encoder,
                decoder: TransformerDecoder::new(&config, vb.pp("decoder"))?,
                label_embedding: embedding(labels.len(), h, vb.pp("labels_embedding"))?,
            }
        };
        let classifier = ClassifierHead::new(&config, vb.pp("classifier"))?;

        debug!(
            body = ?body.kind(),
            encoder_layers = config.num_encoders,
            decoder_layers = if config.use_encoder_only { 0 } else { config.num_decoders },
            class_token = config.use_learnable_token,
            positional_encoding = positional_encoding.as_ref().map(|pe| pe.name()),
            parameters = config.num_parameters(),
            "Built SpectrogramVit"
        );

        Ok(Self {
            labels,
            merge_projection,
            positional_encoding,
            class_token,
            body,
            classifier,
            device: vb.device().clone(),
            dtype: vb.dtype(),
            config,
        })
    }

    /// Fresh randomly initialised model on `config.device`.
    ///
    /// The returned [`VarMap`] owns the trainable variables.
    pub fn init_random(config: VitConfig) -> VitResult<(Self, VarMap)> {
        let device = config.device.to_device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    /// Load weights from one or more safetensors files.
    pub fn from_safetensors<P: AsRef<Path>>(config: VitConfig, paths: &[P]) -> VitResult<Self> {
        let device = config.device.to_device()?;
        // CPU matmul has no BF16 kernels.
        let dtype = if device.is_metal() || device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };
        for path in paths {
            if !path.as_ref().exists() {
                return Err(VitError::Model(format!(
                    "weights file not found: {}",
                    path.as_ref().display()
                )));
            }
        }
        let paths: Vec<&Path> = paths.iter().map(AsRef::as_ref).collect();
        // SAFETY: файлы весов не изменяются, пока модель загружена.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&paths, dtype, &device)? };
        Self::new(config, vb)
    }

    /// Replace the positional encoding with a caller-supplied one.
    ///
    /// The configured encoding is dropped from [`Self::config`], so
    /// [`Self::num_parameters`] no longer counts a learned position table.
    /// Parameters of an injected encoding are owned by the caller.
    pub fn with_positional_encoding(mut self, encoding: Arc<dyn PositionalEncoding>) -> Self {
        self.positional_encoding = Some(encoding);
        self.config.positional_encoding = None;
        self
    }

    /// Evaluation-mode forward pass: `[batch, channels, mels, steps]` -> `[batch, labels]`.
    pub fn forward(&self, xs: &Tensor) -> VitResult<Tensor> {
        self.forward_t(xs, false)
    }

    /// Forward pass; `train` enables dropout.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> VitResult<Tensor> {
        let _span = debug_span!("spectrogram_vit.forward", train).entered();

        let xs = if xs.dtype() != self.dtype {
            xs.to_dtype(self.dtype)?
        } else {
            xs.clone()
        };

        let tokens = self.merge_projection.forward(&xs)?;
        let batch_size = tokens.dim(0)?;
        trace!(shape = ?tokens.dims(), "merged mel bands");

        let tokens = self.add_positions(&tokens, train)?;
        let tokens = match &self.class_token {
            Some(cls) => {
                let cls = self.broadcast_rows(cls, batch_size)?;
                Tensor::cat(&[&cls, &tokens], 1)?
            }
            None => tokens,
        };
        trace!(shape = ?tokens.dims(), "encoder input");

        let pooled = match &self.body {
            Body::EncoderOnly(encoder) => {
                let encoded = encoder.forward_t(&tokens, train)?;
                encoded.i((.., 0, ..))?
            }
            Body::EncoderDecoder {
                encoder,
                decoder,
                label_embedding,
            } => {
                let memory = encoder.forward_t(&tokens, train)?;
                let queries = self.broadcast_rows(label_embedding, batch_size)?;
                let queries = self.add_positions(&queries, train)?;
                let decoded = decoder.forward_t(&queries, &memory, train)?;
                decoded.i((.., 0, ..))?
            }
        };
        let pooled = pooled.contiguous()?;
        trace!(shape = ?pooled.dims(), "pooled");

        let logits = self.classifier.forward_t(&pooled, train)?;
        trace!(shape = ?logits.dims(), "logits");
        Ok(logits)
    }

    fn add_positions(&self, xs: &Tensor, train: bool) -> VitResult<Tensor> {
        match &self.positional_encoding {
            Some(pe) => Ok(pe.forward_t(xs, train)?),
            None => Ok(xs.clone()),
        }
    }

    /// Embedding table [rows, hidden] -> [batch, rows, hidden].
    fn broadcast_rows(&self, table: &Embedding, batch_size: usize) -> VitResult<Tensor> {
        let table = table.embeddings();
        let (rows, hidden) = table.dims2()?;
        Ok(table
            .unsqueeze(0)?
            .broadcast_as((batch_size, rows, hidden))?
            .contiguous()?)
    }

    pub fn config(&self) -> &VitConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn has_class_token(&self) -> bool {
        self.class_token.is_some()
    }

    pub fn positional_encoding(&self) -> Option<&dyn PositionalEncoding> {
        self.positional_encoding.as_deref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Число параметров активных слоев модели.
    pub fn num_parameters(&self) -> usize {
        self.config.num_parameters()
    }
}

impl ModuleT for SpectrogramVit {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        SpectrogramVit::forward_t(self, xs, train).map_err(|e| match e {
            VitError::Candle(e) => e,
            other => candle_core::Error::wrap(other),
        })
    }
}

/// Total number of scalar parameters held by `varmap`.
pub fn count_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
