//! Optimizers and learning rate schedulers for agent training
//!
//! Optimizers own the trainable [`Var`]s of a model and apply one update per
//! [`GradStore`]. The algorithm and its hyperparameters are chosen through
//! [`OptimizerKind`]; combinations an algorithm does not support are
//! normalized by [`OptimizerKind::params`] before construction.

pub mod adam;
pub mod adaptive;
pub mod schedulers;
pub mod sgd;

pub use adam::AdamOptimizer;
pub use adaptive::{AdagradOptimizer, RmsPropOptimizer, RpropOptimizer};
pub use schedulers::MultiStepScheduler;
pub use sgd::SGDOptimizer;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use tracing::debug;

pub use crate::config::OptimizerKind;
use crate::error::Result;

/// Trait for optimizers
pub trait Optimizer: Send {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from the gradients of a backward pass
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Clear accumulated gradients
    ///
    /// Gradients live in the [`GradStore`] returned by each backward pass, so
    /// there is nothing to clear between steps.
    fn zero_grad(&mut self) -> Result<()> {
        Ok(())
    }

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Set the learning rate used by subsequent steps
    fn set_learning_rate(&mut self, lr: f64);

    /// Number of steps taken
    fn step_count(&self) -> usize;

    /// Number of parameter tensors
    fn parameter_count(&self) -> usize;
}

/// Hyperparameters handed to an optimizer after normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerParams {
    /// Learning rate
    pub lr: f64,
    /// Momentum, present only for algorithms that take it
    pub momentum: Option<f64>,
    /// Weight decay, absent for algorithms that do not take it
    pub weight_decay: Option<f64>,
    /// Use the AMSGrad variant of Adam
    pub amsgrad: bool,
}

impl OptimizerKind {
    /// Normalize the configured hyperparameters for this algorithm
    ///
    /// Momentum is only passed to SGD and RMSprop, Rprop takes no weight
    /// decay, and `amsgrad` is Adam with the AMSGrad flag set.
    pub fn params(&self, lr: f64, momentum: f64, weight_decay: f64) -> OptimizerParams {
        let mut params = OptimizerParams {
            lr,
            momentum: None,
            weight_decay: Some(weight_decay),
            amsgrad: false,
        };
        match self {
            OptimizerKind::Sgd | OptimizerKind::RmsProp => params.momentum = Some(momentum),
            OptimizerKind::Rprop => params.weight_decay = None,
            OptimizerKind::AmsGrad => params.amsgrad = true,
            OptimizerKind::Adam | OptimizerKind::AdamW | OptimizerKind::Adagrad => {}
        }
        params
    }
}

/// Build an optimizer over `vars`
pub fn create_optimizer(
    kind: OptimizerKind,
    params: &OptimizerParams,
    vars: Vec<Var>,
) -> Result<Box<dyn Optimizer>> {
    let momentum = params.momentum.unwrap_or(0.0);
    let weight_decay = params.weight_decay.unwrap_or(0.0);
    debug!("Creating {:?} optimizer over {} tensors: {:?}", kind, vars.len(), params);

    let optimizer: Box<dyn Optimizer> = match kind {
        OptimizerKind::Sgd => Box::new(SGDOptimizer::new(vars, params.lr, momentum, weight_decay)),
        OptimizerKind::RmsProp => {
            Box::new(RmsPropOptimizer::new(vars, params.lr, momentum, weight_decay))
        }
        OptimizerKind::Adam | OptimizerKind::AmsGrad => Box::new(AdamOptimizer::adam(
            vars,
            params.lr,
            weight_decay,
            params.amsgrad,
        )),
        OptimizerKind::AdamW => Box::new(AdamOptimizer::adamw(vars, params.lr, weight_decay)),
        OptimizerKind::Adagrad => Box::new(AdagradOptimizer::new(vars, params.lr, weight_decay)),
        OptimizerKind::Rprop => Box::new(RpropOptimizer::new(vars, params.lr)),
    };
    Ok(optimizer)
}

/// Gradient of `var` plus the L2 penalty `weight_decay * var`
pub(crate) fn decayed_grad(
    gradients: &GradStore,
    var: &Var,
    weight_decay: f64,
) -> Result<Option<(Tensor, Tensor)>> {
    let param = var.as_tensor().detach();
    let grad = match gradients.get(var.as_tensor()) {
        Some(grad) => grad.detach(),
        None => return Ok(None),
    };
    let grad = if weight_decay > 0.0 {
        (grad + (&param * weight_decay)?)?
    } else {
        grad
    };
    Ok(Some((param, grad)))
}

/// Lazily created per-parameter state tensor
pub(crate) fn state_or_zeros(slot: &mut Option<Tensor>, like: &Tensor) -> Result<Tensor> {
    match slot {
        Some(t) => Ok(t.clone()),
        None => {
            let zeros = like.zeros_like()?;
            *slot = Some(zeros.clone());
            Ok(zeros)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_hyperparameter_normalization() {
        let sgd = OptimizerKind::Sgd.params(0.1, 0.9, 1e-4);
        assert_eq!(sgd.momentum, Some(0.9));
        assert_eq!(sgd.weight_decay, Some(1e-4));

        let rms = OptimizerKind::RmsProp.params(0.1, 0.9, 1e-4);
        assert_eq!(rms.momentum, Some(0.9));

        let rprop = OptimizerKind::Rprop.params(0.1, 0.9, 1e-4);
        assert_eq!(rprop.momentum, None);
        assert_eq!(rprop.weight_decay, None);

        let ams = OptimizerKind::AmsGrad.params(0.1, 0.9, 1e-4);
        assert!(ams.amsgrad);
        assert_eq!(ams.momentum, None);

        let adam = OptimizerKind::Adam.params(0.1, 0.9, 1e-4);
        assert!(!adam.amsgrad);
        assert_eq!(adam.momentum, None);
    }

    #[test]
    fn test_every_kind_builds_and_steps() -> Result<()> {
        for kind in [
            OptimizerKind::Sgd,
            OptimizerKind::RmsProp,
            OptimizerKind::Adam,
            OptimizerKind::AmsGrad,
            OptimizerKind::AdamW,
            OptimizerKind::Adagrad,
            OptimizerKind::Rprop,
        ] {
            let var = test_util::scalar_var(1.0)?;
            let params = kind.params(0.01, 0.9, 1e-3);
            let mut optimizer = create_optimizer(kind, &params, vec![var.clone()])?;

            let grads = test_util::square_loss_grads(&var)?;
            optimizer.zero_grad()?;
            optimizer.step(&grads)?;

            assert_eq!(optimizer.step_count(), 1);
            assert!(test_util::value(&var)? < 1.0, "{kind:?} did not descend");
        }
        Ok(())
    }
}
