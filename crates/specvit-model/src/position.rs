//! Built-in positional encodings.
//!
//! Both implement [`PositionalEncoding`]: `[batch, seq_len, hidden]` in,
//! same shape out, with a per-position vector added to every batch row.

use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};
use specvit_core::{PositionalEncoding, VitResult};

use crate::config::{PositionalEncodingConfig, VitConfig};

/// Add `table[..seq_len]` to every row of `xs`.
fn add_table(table: &Tensor, xs: &Tensor) -> Result<Tensor> {
    let (_, seq_len, _) = xs.dims3()?;
    let max_len = table.dim(0)?;
    if seq_len > max_len {
        candle_core::bail!(
            "sequence length {seq_len} exceeds positional encoding max_len {max_len}"
        );
    }
    let pos = table.narrow(0, 0, seq_len)?.unsqueeze(0)?;
    let pos = if pos.dtype() != xs.dtype() {
        pos.to_dtype(xs.dtype())?
    } else {
        pos
    };
    xs.broadcast_add(&pos)
}

/// Fixed sin/cos encoding.
///
/// `pe[pos, 2i] = sin(pos / 10000^(2i/d))`, `pe[pos, 2i+1] = cos(...)`.
#[derive(Debug, Clone)]
pub struct SinusoidalPositionalEncoding {
    table: Tensor,
}

impl SinusoidalPositionalEncoding {
    /// # Arguments
    /// * `max_len` - Longest sequence the table covers
    /// * `channels` - Embedding dimension (must be even)
    /// * `device` - Device to create the table on
    /// * `dtype` - Data type of the table
    pub fn new(max_len: usize, channels: usize, device: &Device, dtype: DType) -> Result<Self> {
        if channels % 2 != 0 {
            candle_core::bail!("SinusoidalPositionalEncoding needs even channels, got {channels}");
        }

        let half = channels / 2;
        let inv_freq: Vec<f32> = (0..half)
            .map(|i| (-(10000f64.ln()) * (2 * i) as f64 / channels as f64).exp() as f32)
            .collect();

        let mut data = vec![0.0_f32; max_len * channels];
        for pos in 0..max_len {
            for (i, freq) in inv_freq.iter().enumerate() {
                let angle = pos as f32 * freq;
                data[pos * channels + 2 * i] = angle.sin();
                data[pos * channels + 2 * i + 1] = angle.cos();
            }
        }

        let table = Tensor::from_vec(data, (max_len, channels), device)?.to_dtype(dtype)?;
        Ok(Self { table })
    }

    pub fn max_len(&self) -> usize {
        self.table.dims()[0]
    }
}

impl PositionalEncoding for SinusoidalPositionalEncoding {
    fn name(&self) -> &str {
        "sinusoidal"
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        add_table(&self.table, xs)
    }
}

/// Trainable absolute position table (`positional_encoding.weight`).
#[derive(Debug, Clone)]
pub struct LearnedPositionalEncoding {
    embedding: Embedding,
}

impl LearnedPositionalEncoding {
    pub fn new(max_len: usize, channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: embedding(max_len, channels, vb)?,
        })
    }
}

impl PositionalEncoding for LearnedPositionalEncoding {
    fn name(&self) -> &str {
        "learned"
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        add_table(self.embedding.embeddings(), xs)
    }
}

/// Build the configured encoding, if any.
pub fn build_positional_encoding(
    config: &VitConfig,
    vb: VarBuilder,
) -> VitResult<Option<Arc<dyn PositionalEncoding>>> {
    let encoding: Option<Arc<dyn PositionalEncoding>> = match config.positional_encoding {
        None => None,
        Some(PositionalEncodingConfig::Sinusoidal { max_len }) => {
            Some(Arc::new(SinusoidalPositionalEncoding::new(
                max_len,
                config.hidden_size,
                vb.device(),
                vb.dtype(),
            )?))
        }
        Some(PositionalEncodingConfig::Learned { max_len }) => Some(Arc::new(
            LearnedPositionalEncoding::new(max_len, config.hidden_size, vb)?,
        )),
    };
    Ok(encoding)
}
