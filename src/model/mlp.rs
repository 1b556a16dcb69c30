//! Multi-layer perceptron backbone

use candle_nn::{linear, Linear, Module, VarBuilder};

use super::{Backbone, ModelInput};
use crate::error::{Error, Result};

/// Fully connected ReLU stack over flattened dense inputs
pub struct MlpBackbone {
    layers: Vec<Linear>,
    out_dim: usize,
}

impl MlpBackbone {
    /// Create a backbone with the given hidden widths
    ///
    /// With no hidden layers the backbone passes the flattened input through.
    pub fn new(in_dim: usize, hidden: &[usize], vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden.len());
        let mut width = in_dim;
        for (i, &h) in hidden.iter().enumerate() {
            layers.push(linear(width, h, vb.pp(format!("fc{i}")))?);
            width = h;
        }
        Ok(Self {
            layers,
            out_dim: width,
        })
    }
}

impl Backbone for MlpBackbone {
    fn features(&self, input: &ModelInput, _train: bool) -> Result<candle_core::Tensor> {
        let x = match input {
            ModelInput::Dense(x) => x,
            ModelInput::Sequence(_) => {
                return Err(Error::invalid_input(
                    "MLP backbone expects dense feature tensors",
                ))
            }
        };

        let mut h = x.flatten_from(1)?;
        for layer in &self.layers {
            h = layer.forward(&h)?.relu()?;
        }
        Ok(h)
    }

    fn feature_dim(&self) -> usize {
        self.out_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarMap;

    #[test]
    fn test_flattens_image_like_input() -> Result<()> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let mlp = MlpBackbone::new(12, &[5, 4], vb)?;

        let x = Tensor::ones((3, 3, 4), DType::F32, &device)?;
        let h = mlp.features(&ModelInput::Dense(x), true)?;
        assert_eq!(h.dims(), &[3, 4]);
        assert_eq!(mlp.feature_dim(), 4);
        Ok(())
    }
}
