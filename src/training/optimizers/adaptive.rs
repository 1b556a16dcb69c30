//! Per-parameter adaptive step optimizers: RMSprop, Adagrad and Rprop

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::{decayed_grad, state_or_zeros, Optimizer};
use crate::error::Result;

/// RMSprop with optional momentum
pub struct RmsPropOptimizer {
    vars: Vec<Var>,
    learning_rate: f64,
    /// Smoothing constant of the squared-gradient average
    alpha: f64,
    epsilon: f64,
    momentum: f64,
    weight_decay: f64,
    step_count: usize,
    square_avg: Vec<Option<Tensor>>,
    momentum_buffers: Vec<Option<Tensor>>,
}

impl RmsPropOptimizer {
    /// Create a new RMSprop optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        let n = vars.len();
        Self {
            vars,
            learning_rate,
            alpha: 0.99,
            epsilon: 1e-8,
            momentum,
            weight_decay,
            step_count: 0,
            square_avg: vec![None; n],
            momentum_buffers: vec![None; n],
        }
    }
}

impl Optimizer for RmsPropOptimizer {
    fn name(&self) -> &str {
        "rmsprop"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        for (i, var) in self.vars.iter().enumerate() {
            let Some((param, grad)) = decayed_grad(gradients, var, self.weight_decay)? else {
                continue;
            };

            let sq = state_or_zeros(&mut self.square_avg[i], &grad)?;
            let sq = ((sq * self.alpha)? + (grad.sqr()? * (1.0 - self.alpha))?)?;
            let avg = (sq.sqrt()? + self.epsilon)?;
            self.square_avg[i] = Some(sq);

            let direction = grad.div(&avg)?;
            let direction = if self.momentum > 0.0 {
                let buf = state_or_zeros(&mut self.momentum_buffers[i], &grad)?;
                let buf = ((buf * self.momentum)? + direction)?;
                self.momentum_buffers[i] = Some(buf.clone());
                buf
            } else {
                direction
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

/// Adagrad
pub struct AdagradOptimizer {
    vars: Vec<Var>,
    learning_rate: f64,
    epsilon: f64,
    weight_decay: f64,
    step_count: usize,
    sum_sq: Vec<Option<Tensor>>,
}

impl AdagradOptimizer {
    /// Create a new Adagrad optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Self {
        let n = vars.len();
        Self {
            vars,
            learning_rate,
            epsilon: 1e-10,
            weight_decay,
            step_count: 0,
            sum_sq: vec![None; n],
        }
    }
}

impl Optimizer for AdagradOptimizer {
    fn name(&self) -> &str {
        "adagrad"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        for (i, var) in self.vars.iter().enumerate() {
            let Some((param, grad)) = decayed_grad(gradients, var, self.weight_decay)? else {
                continue;
            };

            let sum = (state_or_zeros(&mut self.sum_sq[i], &grad)? + grad.sqr()?)?;
            let std = (sum.sqrt()? + self.epsilon)?;
            self.sum_sq[i] = Some(sum);

            let update = (grad.div(&std)? * self.learning_rate)?;
            var.set(&(param - update)?)?;
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

/// Resilient backpropagation
///
/// Each parameter keeps its own step size, grown by `eta_plus` while the
/// gradient sign is stable and shrunk by `eta_minus` when it flips. Only the
/// gradient sign moves the parameter.
pub struct RpropOptimizer {
    vars: Vec<Var>,
    learning_rate: f64,
    eta_minus: f64,
    eta_plus: f64,
    step_min: f64,
    step_max: f64,
    step_count: usize,
    prev_grad: Vec<Option<Tensor>>,
    step_sizes: Vec<Option<Tensor>>,
}

impl RpropOptimizer {
    /// Create a new Rprop optimizer; `learning_rate` is the initial step size
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Self {
        let n = vars.len();
        Self {
            vars,
            learning_rate,
            eta_minus: 0.5,
            eta_plus: 1.2,
            step_min: 1e-6,
            step_max: 50.0,
            step_count: 0,
            prev_grad: vec![None; n],
            step_sizes: vec![None; n],
        }
    }
}

/// Element-wise sign as -1, 0 or 1
fn sign(t: &Tensor) -> Result<Tensor> {
    let zeros = t.zeros_like()?;
    let ones = t.ones_like()?;
    let positive = t.gt(&zeros)?.where_cond(&ones, &zeros)?;
    let negative = t.lt(&zeros)?.where_cond(&ones, &zeros)?;
    Ok((positive - negative)?)
}

impl Optimizer for RpropOptimizer {
    fn name(&self) -> &str {
        "rprop"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        for (i, var) in self.vars.iter().enumerate() {
            let Some((param, grad)) = decayed_grad(gradients, var, 0.0)? else {
                continue;
            };

            let prev = state_or_zeros(&mut self.prev_grad[i], &grad)?;
            let step = match &self.step_sizes[i] {
                Some(step) => step.clone(),
                None => (grad.ones_like()? * self.learning_rate)?,
            };

            let agreement = (&grad * &prev)?;
            let zeros = agreement.zeros_like()?;
            let ones = agreement.ones_like()?;
            let grew = agreement.gt(&zeros)?;
            let flipped = agreement.lt(&zeros)?;

            let factor = grew.where_cond(
                &(&ones * self.eta_plus)?,
                &flipped.where_cond(&(&ones * self.eta_minus)?, &ones)?,
            )?;
            let step = (step * factor)?.clamp(self.step_min, self.step_max)?;

            // no move and no memory after a sign flip
            let grad = flipped.where_cond(&zeros, &grad)?;
            let update = (sign(&grad)? * &step)?;
            var.set(&(param - update)?)?;

            self.prev_grad[i] = Some(grad);
            self.step_sizes[i] = Some(step);
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
    fn test_rmsprop_first_step() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = RmsPropOptimizer::new(vec![var.clone()], 0.01, 0.0, 0.0);

        // sq = 0.01 * 4 -> g / sqrt(sq) = 2 / 0.2 = 10
        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.9, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_adagrad_first_step() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = AdagradOptimizer::new(vec![var.clone()], 0.1, 0.0);

        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.9, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_rprop_grows_step_while_sign_holds() -> Result<()> {
        let var = scalar_var(1.0)?;
        let mut opt = RpropOptimizer::new(vec![var.clone()], 0.1);

        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.9, epsilon = 1e-5);

        opt.step(&square_loss_grads(&var)?)?;
        assert_relative_eq!(value(&var)?, 0.78, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_sign() -> Result<()> {
        let t = Tensor::new(&[-2f32, 0.0, 3.0], &candle_core::Device::Cpu)?;
        assert_eq!(sign(&t)?.to_vec1::<f32>()?, vec![-1.0, 0.0, 1.0]);
        Ok(())
    }
}
