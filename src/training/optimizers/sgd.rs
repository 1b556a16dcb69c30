//! SGD optimizer implementation with momentum
//!
//! Stochastic Gradient Descent with optional heavy-ball momentum and L2
//! weight decay folded into the gradient.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::{decayed_grad, Optimizer};
use crate::error::Result;

/// SGD optimizer with momentum
pub struct SGDOptimizer {
    /// Trainable parameters
    vars: Vec<Var>,

    /// Learning rate
    learning_rate: f64,

    /// Momentum coefficient
    momentum: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    /// Current step count
    step_count: usize,

    /// Momentum buffers, one per parameter
    momentum_buffers: Vec<Option<Tensor>>,
}

impl SGDOptimizer {
    /// Create a new SGD optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        let momentum_buffers = vec![None; vars.len()];
        Self {
            vars,
            learning_rate,
            momentum,
            weight_decay,
            step_count: 0,
            momentum_buffers,
        }
    }
}

impl Optimizer for SGDOptimizer {
    fn name(&self) -> &str {
        if self.momentum > 0.0 {
            "sgd_momentum"
        } else {
            "sgd"
        }
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        for (var, buffer) in self.vars.iter().zip(self.momentum_buffers.iter_mut()) {
            let Some((param, grad)) = decayed_grad(gradients, var, self.weight_decay)? else {
                continue;
            };

            let direction = if self.momentum > 0.0 {
                // b_t = μ * b_{t-1} + g_t, seeded with the first gradient
                let next = match buffer.take() {
                    Some(prev) => ((prev * self.momentum)? + &grad)?,
                    None => grad,
                };
                *buffer = Some(next.clone());
                next
            } else {
                grad
            };

            var.set(&(param - (direction * self.learning_rate)?)?)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.vars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{scalar_var, square_loss_grads, value};
    use super::*;
    use anyhow::Result;
    use approx::assert_relative_eq;

    #[test]
    fn test_plain_sgd_step() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = SGDOptimizer::new(vec![var.clone()], 0.1, 0.0, 0.0);
        assert_eq!(opt.name(), "sgd");

        // d/dp p^2 = 2p -> 1 - 0.1 * 2
        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.8, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_momentum_accumulates() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = SGDOptimizer::new(vec![var.clone()], 0.1, 0.9, 0.0);
        assert_eq!(opt.name(), "sgd_momentum");

        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.8, epsilon = 1e-6);

        // b = 0.9 * 2.0 + 1.6 = 3.4 -> 0.8 - 0.34
        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.46, epsilon = 1e-6);
        assert_eq!(opt.step_count(), 2);
        Ok(())
    }

    #[test]
    fn test_weight_decay_adds_l2_gradient() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = SGDOptimizer::new(vec![var.clone()], 0.1, 0.0, 0.5);

        // g = 2p + 0.5p = 2.5 -> 1 - 0.25
        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.75, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_learning_rate_update() {
        let mut opt = SGDOptimizer::new(Vec::new(), 0.1, 0.0, 0.0);
        opt.set_learning_rate(0.01);
        assert_eq!(opt.learning_rate(), 0.01);
        assert_eq!(opt.parameter_count(), 0);
    }
}
