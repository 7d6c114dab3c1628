//! Transformer encoder and decoder stacks.
//!
//! Post-norm blocks with ReLU feed-forward, laid out like
//! `torch.nn.TransformerEncoderLayer` / `TransformerDecoderLayer`:
//! - residual -> dropout -> add -> LayerNorm after every sub-block
//! - FFN: linear1 -> ReLU -> dropout -> linear2
//! - decoder cross-attention is named `multihead_attn`

use candle_core::{Result, Tensor};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, Module, ModuleT, VarBuilder};
use tracing::trace;

use crate::attention::MultiHeadAttention;
use crate::config::VitConfig;

/// Feed-Forward Network with ReLU activation.
#[derive(Debug, Clone)]
pub struct FeedForward {
    linear1: Linear,
    linear2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let linear1 = linear(config.hidden_size, config.ffn_dim(), vb.pp("linear1"))?;
        let linear2 = linear(config.ffn_dim(), config.hidden_size, vb.pp("linear2"))?;
        Ok(Self {
            linear1,
            linear2,
            dropout: Dropout::new(config.dropout_p),
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.linear1.forward(xs)?.relu()?;
        let hidden = self.dropout.forward_t(&hidden, train)?;
        self.linear2.forward(&hidden)
    }
}

/// Self-attention block followed by a feed-forward block.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            self_attn: MultiHeadAttention::new(
                h,
                config.num_heads,
                config.dropout_p,
                vb.pp("self_attn"),
            )?,
            ffn: FeedForward::new(config, vb.clone())?,
            norm1: layer_norm(h, config.layer_norm_eps, vb.pp("norm1"))?,
            norm2: layer_norm(h, config.layer_norm_eps, vb.pp("norm2"))?,
            dropout1: Dropout::new(config.dropout_p),
            dropout2: Dropout::new(config.dropout_p),
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let attn = self.self_attn.forward_self(xs, train)?;
        let xs = self
            .norm1
            .forward(&(xs + self.dropout1.forward_t(&attn, train)?)?)?;

        let ff = self.ffn.forward_t(&xs, train)?;
        self.norm2
            .forward(&(&xs + self.dropout2.forward_t(&ff, train)?)?)
    }
}

/// Self-attention, cross-attention over encoder memory, then feed-forward.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    multihead_attn: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
    dropout3: Dropout,
}

impl DecoderLayer {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        let eps = config.layer_norm_eps;
        let attention = |name: &str| {
            MultiHeadAttention::new(h, config.num_heads, config.dropout_p, vb.pp(name))
        };
        Ok(Self {
            self_attn: attention("self_attn")?,
            multihead_attn: attention("multihead_attn")?,
            ffn: FeedForward::new(config, vb.clone())?,
            norm1: layer_norm(h, eps, vb.pp("norm1"))?,
            norm2: layer_norm(h, eps, vb.pp("norm2"))?,
            norm3: layer_norm(h, eps, vb.pp("norm3"))?,
            dropout1: Dropout::new(config.dropout_p),
            dropout2: Dropout::new(config.dropout_p),
            dropout3: Dropout::new(config.dropout_p),
        })
    }

    /// `tgt` [batch, tgt_len, hidden], `memory` [batch, src_len, hidden].
    pub fn forward_t(&self, tgt: &Tensor, memory: &Tensor, train: bool) -> Result<Tensor> {
        let attn = self.self_attn.forward_self(tgt, train)?;
        let xs = self
            .norm1
            .forward(&(tgt + self.dropout1.forward_t(&attn, train)?)?)?;

        let cross = self.multihead_attn.forward_t(&xs, memory, train)?;
        let xs = self
            .norm2
            .forward(&(&xs + self.dropout2.forward_t(&cross, train)?)?)?;

        let ff = self.ffn.forward_t(&xs, train)?;
        self.norm3
            .forward(&(&xs + self.dropout3.forward_t(&ff, train)?)?)
    }
}

/// Stack of [`EncoderLayer`]s (no final norm).
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    layers: Vec<EncoderLayer>,
}

impl TransformerEncoder {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_encoders)
            .map(|i| EncoderLayer::new(config, vb.pp(format!("layers.{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden_states = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            hidden_states = layer.forward_t(&hidden_states, train)?;
            trace!(layer = i, shape = ?hidden_states.dims(), "encoder layer");
        }
        Ok(hidden_states)
    }
}

/// Stack of [`DecoderLayer`]s (no final norm).
#[derive(Debug, Clone)]
pub struct TransformerDecoder {
    layers: Vec<DecoderLayer>,
}

impl TransformerDecoder {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_decoders)
            .map(|i| DecoderLayer::new(config, vb.pp(format!("layers.{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn forward_t(&self, tgt: &Tensor, memory: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden_states = tgt.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            hidden_states = layer.forward_t(&hidden_states, memory, train)?;
            trace!(layer = i, shape = ?hidden_states.dims(), "decoder layer");
        }
        Ok(hidden_states)
    }
}
