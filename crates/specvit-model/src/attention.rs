//! Multi-head attention with a packed input projection.
//!
//! Parameters follow the `torch.nn.MultiheadAttention` layout:
//! - `in_proj_weight` [3 * hidden, hidden] and `in_proj_bias` [3 * hidden],
//!   split into Q/K/V projections at construction
//! - `out_proj` (Linear with bias)
//!
//! The same layer serves self-attention (`query == memory`) and
//! cross-attention (decoder queries over encoder memory).

use candle_core::{DType, Result, Tensor};
use candle_nn::{init, linear, Dropout, Linear, Module, ModuleT, VarBuilder};

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    attn_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        dropout_p: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            candle_core::bail!(
                "hidden_size ({hidden_size}) must be divisible by num_heads ({num_heads})"
            );
        }
        let head_dim = hidden_size / num_heads;

        // Xavier-uniform over the packed matrix, zero bias.
        let bound = (6.0 / (hidden_size + 3 * hidden_size) as f64).sqrt();
        let in_proj_weight = vb.get_with_hints(
            (3 * hidden_size, hidden_size),
            "in_proj_weight",
            init::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let in_proj_bias = vb.get_with_hints(3 * hidden_size, "in_proj_bias", init::ZERO)?;

        let split = |i: usize| -> Result<Linear> {
            let w = in_proj_weight.narrow(0, i * hidden_size, hidden_size)?;
            let b = in_proj_bias.narrow(0, i * hidden_size, hidden_size)?;
            Ok(Linear::new(w, Some(b)))
        };

        Ok(Self {
            q_proj: split(0)?,
            k_proj: split(1)?,
            v_proj: split(2)?,
            out_proj: linear(hidden_size, hidden_size, vb.pp("out_proj"))?,
            attn_dropout: Dropout::new(dropout_p),
            num_heads,
            head_dim,
        })
    }

    /// [batch, seq_len, hidden] -> [batch, num_heads, seq_len, head_dim]
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        xs.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Attend from `query` [batch, q_len, hidden] over `memory` [batch, kv_len, hidden].
    pub fn forward_t(&self, query: &Tensor, memory: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, q_len, _) = query.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(query)?)?;
        let k = self.split_heads(&self.k_proj.forward(memory)?)?;
        let v = self.split_heads(&self.v_proj.forward(memory)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;

        // softmax в float32 для стабильности.
        let weights = candle_nn::ops::softmax_last_dim(&scores.to_dtype(DType::F32)?)?
            .to_dtype(scores.dtype())?;
        let weights = self.attn_dropout.forward_t(&weights, train)?;

        let context = weights.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            q_len,
            self.num_heads * self.head_dim,
        ))?;

        self.out_proj.forward(&context)
    }

    pub fn forward_self(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_t(xs, xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn attention(hidden: usize, heads: usize) -> (MultiHeadAttention, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = MultiHeadAttention::new(hidden, heads, 0.0, vb).unwrap();
        (attn, varmap)
    }

    #[test]
    fn test_self_attention_shape() {
        let (attn, _varmap) = attention(16, 4);
        let xs = Tensor::randn(0f32, 1f32, (2, 7, 16), &Device::Cpu).unwrap();
        let out = attn.forward_self(&xs, false).unwrap();
        assert_eq!(out.dims(), &[2, 7, 16]);
    }

    #[test]
    fn test_cross_attention_follows_query_length() {
        let (attn, _varmap) = attention(16, 2);
        let query = Tensor::randn(0f32, 1f32, (3, 5, 16), &Device::Cpu).unwrap();
        let memory = Tensor::randn(0f32, 1f32, (3, 11, 16), &Device::Cpu).unwrap();
        let out = attn.forward_t(&query, &memory, false).unwrap();
        assert_eq!(out.dims(), &[3, 5, 16]);
    }

    #[test]
    fn test_packed_parameters() {
        let (_attn, varmap) = attention(8, 2);
        let data = varmap.data().lock().unwrap();
        assert_eq!(data["in_proj_weight"].dims(), &[24, 8]);
        assert_eq!(data["in_proj_bias"].dims(), &[24]);
        assert_eq!(data["out_proj.weight"].dims(), &[8, 8]);
    }

    #[test]
    fn test_rejects_uneven_heads() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(MultiHeadAttention::new(10, 3, 0.0, vb).is_err());
    }
}
