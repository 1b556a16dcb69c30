//! Per-head base losses

use candle_core::{DType, Tensor};
use candle_nn as nn;

use crate::error::{Error, Result};

/// Loss applied to the rows routed to one head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseLoss {
    /// Mean cross-entropy over integer class targets
    CrossEntropy,
    /// Mean squared error over real-valued targets
    MeanSquaredError,
}

impl BaseLoss {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            BaseLoss::CrossEntropy => "cross_entropy",
            BaseLoss::MeanSquaredError => "mse",
        }
    }

    /// Mean loss of `preds` against `targets`
    pub fn compute(&self, preds: &Tensor, targets: &Tensor) -> Result<Tensor> {
        match self {
            BaseLoss::CrossEntropy => {
                if preds.rank() != 2 {
                    return Err(Error::invalid_input(format!(
                        "cross-entropy expects [batch, classes] logits, got {:?}",
                        preds.dims()
                    )));
                }
                let labels = targets.flatten_all()?.to_dtype(DType::U32)?;
                Ok(nn::loss::cross_entropy(preds, &labels)?)
            }
            BaseLoss::MeanSquaredError => {
                // [N, 1] regression heads compare against [N] targets
                let preds = preds.flatten_all()?;
                let targets = targets.flatten_all()?.to_dtype(preds.dtype())?;
                Ok(nn::loss::mse(&preds, &targets)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_cross_entropy_uniform_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((4, 3), DType::F32, &device)?;
        let targets = Tensor::new(&[0u32, 1, 2, 1], &device)?;

        let loss = BaseLoss::CrossEntropy
            .compute(&logits, &targets)?
            .to_scalar::<f32>()?;
        assert_relative_eq!(loss as f64, 3f64.ln(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_cross_entropy_accepts_float_labels() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2.0f32, 0.0], [0.0, 2.0]], &device)?;
        let float_targets = Tensor::new(&[0f32, 1.0], &device)?;
        let int_targets = Tensor::new(&[0u32, 1], &device)?;

        let a = BaseLoss::CrossEntropy.compute(&logits, &float_targets)?.to_scalar::<f32>()?;
        let b = BaseLoss::CrossEntropy.compute(&logits, &int_targets)?.to_scalar::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_mse_squeezes_single_column() -> Result<()> {
        let device = Device::Cpu;
        let preds = Tensor::new(&[[1.0f32], [2.0], [3.0]], &device)?;
        let targets = Tensor::new(&[1.0f64, 0.0, 3.0], &device)?;

        let loss = BaseLoss::MeanSquaredError
            .compute(&preds, &targets)?
            .to_scalar::<f32>()?;
        assert_relative_eq!(loss, 4.0 / 3.0, epsilon = 1e-6);
        Ok(())
    }
}
