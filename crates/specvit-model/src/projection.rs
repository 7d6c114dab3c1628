//! Mel-band merge projection: spectrogram -> token sequence.

use candle_core::Tensor;
use candle_nn::{init, Conv2d, Conv2dConfig, Module, VarBuilder};
use specvit_core::{VitError, VitResult};

use crate::config::VitConfig;

/// Conv2D whose kernel spans every mel band and a single time step.
///
/// `[batch, channels, mels, steps]` -> conv -> `[batch, hidden, 1, steps]`
/// -> `[batch, steps, hidden]`. One token per time step.
#[derive(Debug, Clone)]
pub struct MergeProjection {
    conv: Conv2d,
    in_channels: usize,
    mels: usize,
}

impl MergeProjection {
    pub fn new(config: &VitConfig, vb: VarBuilder) -> VitResult<Self> {
        let (out_c, in_c, mels) = (config.hidden_size, config.in_channels, config.mels);

        // Same initialisation as candle_nn::conv2d, with a (mels, 1) kernel.
        let weight = vb.get_with_hints(
            (out_c, in_c, mels, 1),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bound = 1. / ((in_c * mels) as f64).sqrt();
        let bias = vb.get_with_hints(
            out_c,
            "bias",
            init::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;

        let conv_cfg = Conv2dConfig {
            stride: 1,
            padding: 0,
            ..Default::default()
        };
        Ok(Self {
            conv: Conv2d::new(weight, Some(bias), conv_cfg),
            in_channels: in_c,
            mels,
        })
    }

    pub fn forward(&self, xs: &Tensor) -> VitResult<Tensor> {
        if xs.rank() != 4 {
            return Err(VitError::shape(format!(
                "expected [batch, channels, mels, steps], got {:?}",
                xs.dims()
            )));
        }
        let (batch, channels, mels, steps) = xs.dims4()?;
        if channels != self.in_channels || mels != self.mels {
            return Err(VitError::shape(format!(
                "expected {} channels x {} mel bands, got {channels} x {mels}",
                self.in_channels, self.mels
            )));
        }
        if batch == 0 || steps == 0 {
            return Err(VitError::shape(format!("empty input {:?}", xs.dims())));
        }

        let xs = self.conv.forward(xs)?; // [batch, hidden, 1, steps]
        Ok(xs.squeeze(2)?.transpose(1, 2)?.contiguous()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn projection(channels: usize, mels: usize, hidden: usize) -> (MergeProjection, VarMap) {
        let config = VitConfig::new(channels, ["x"], mels, hidden, 1);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        (MergeProjection::new(&config, vb).unwrap(), varmap)
    }

    #[test]
    fn test_one_token_per_step() {
        let (proj, _varmap) = projection(2, 16, 8);
        let xs = Tensor::randn(0f32, 1f32, (3, 2, 16, 10), &Device::Cpu).unwrap();
        let tokens = proj.forward(&xs).unwrap();
        assert_eq!(tokens.dims(), &[3, 10, 8]);
    }

    #[test]
    fn test_mel_mismatch_is_shape_error() {
        let (proj, _varmap) = projection(1, 16, 8);
        let xs = Tensor::zeros((1, 1, 20, 10), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(proj.forward(&xs), Err(VitError::Shape(_))));

        let xs = Tensor::zeros((1, 2, 16, 10), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(proj.forward(&xs), Err(VitError::Shape(_))));

        let xs = Tensor::zeros((1, 16, 10), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(proj.forward(&xs), Err(VitError::Shape(_))));
    }

    #[test]
    fn test_matches_per_step_dot_product() {
        // Each token is W·x[:, :, t] + b, i.e. a linear map of the step's mel column.
        let (proj, varmap) = projection(1, 4, 2);
        let xs = Tensor::randn(0f32, 1f32, (1, 1, 4, 3), &Device::Cpu).unwrap();
        let tokens = proj.forward(&xs).unwrap();

        let data = varmap.data().lock().unwrap();
        let w = data["weight"].as_tensor().reshape((2, 4)).unwrap();
        let b = data["bias"].as_tensor().clone();
        let cols = xs.reshape((4, 3)).unwrap();
        let expected = w
            .matmul(&cols)
            .unwrap()
            .broadcast_add(&b.unsqueeze(1).unwrap())
            .unwrap()
            .t()
            .unwrap()
            .unsqueeze(0)
            .unwrap();

        let diff: f32 = (tokens - expected)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5);
    }
}
