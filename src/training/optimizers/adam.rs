//! Adam family optimizers
//!
//! One implementation covers Adam with L2 weight decay, its AMSGrad variant,
//! and AdamW with decoupled weight decay.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::{decayed_grad, state_or_zeros, Optimizer};
use crate::error::Result;

/// How weight decay enters the update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecayMode {
    /// Added to the gradient
    L2,
    /// Applied to the parameter before the moment update
    Decoupled,
}

/// Adam optimizer
pub struct AdamOptimizer {
    /// Trainable parameters
    vars: Vec<Var>,

    /// Learning rate
    learning_rate: f64,

    /// Beta1 parameter (momentum)
    beta1: f64,

    /// Beta2 parameter (RMSprop)
    beta2: f64,

    /// Epsilon for numerical stability
    epsilon: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    decay_mode: DecayMode,

    /// Keep the running maximum of second moments
    amsgrad: bool,

    /// Current step count
    step_count: usize,

    /// First moment estimates
    momentum: Vec<Option<Tensor>>,

    /// Second moment estimates
    variance: Vec<Option<Tensor>>,

    /// Running maximum of the second moments (AMSGrad)
    max_variance: Vec<Option<Tensor>>,
}

impl AdamOptimizer {
    fn with_mode(
        vars: Vec<Var>,
        learning_rate: f64,
        weight_decay: f64,
        decay_mode: DecayMode,
        amsgrad: bool,
    ) -> Self {
        let n = vars.len();
        Self {
            vars,
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            decay_mode,
            amsgrad,
            step_count: 0,
            momentum: vec![None; n],
            variance: vec![None; n],
            max_variance: vec![None; n],
        }
    }

    /// Adam with L2 weight decay, optionally with AMSGrad
    pub fn adam(vars: Vec<Var>, learning_rate: f64, weight_decay: f64, amsgrad: bool) -> Self {
        Self::with_mode(vars, learning_rate, weight_decay, DecayMode::L2, amsgrad)
    }

    /// AdamW with decoupled weight decay
    pub fn adamw(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Self {
        Self::with_mode(vars, learning_rate, weight_decay, DecayMode::Decoupled, false)
    }

    /// Whether the AMSGrad variant is active
    pub fn is_amsgrad(&self) -> bool {
        self.amsgrad
    }
}

impl Optimizer for AdamOptimizer {
    fn name(&self) -> &str {
        match (self.decay_mode, self.amsgrad) {
            (DecayMode::Decoupled, _) => "adamw",
            (DecayMode::L2, true) => "amsgrad",
            (DecayMode::L2, false) => "adam",
        }
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;
        let t = self.step_count as i32;
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);
        let l2 = match self.decay_mode {
            DecayMode::L2 => self.weight_decay,
            DecayMode::Decoupled => 0.0,
        };

        for (i, var) in self.vars.iter().enumerate() {
            let Some((mut param, grad)) = decayed_grad(gradients, var, l2)? else {
                continue;
            };
            if self.decay_mode == DecayMode::Decoupled && self.weight_decay > 0.0 {
                param = (param * (1.0 - self.learning_rate * self.weight_decay))?;
            }

            // m_t = β₁ * m_{t-1} + (1 - β₁) * g_t
            let m = state_or_zeros(&mut self.momentum[i], &grad)?;
            let m = ((m * self.beta1)? + (&grad * (1.0 - self.beta1))?)?;
            // v_t = β₂ * v_{t-1} + (1 - β₂) * g_t²
            let v = state_or_zeros(&mut self.variance[i], &grad)?;
            let v = ((v * self.beta2)? + (grad.sqr()? * (1.0 - self.beta2))?)?;

            let second = if self.amsgrad {
                let prev_max = state_or_zeros(&mut self.max_variance[i], &grad)?;
                let v_max = prev_max.maximum(&v)?;
                self.max_variance[i] = Some(v_max.clone());
                v_max
            } else {
                v.clone()
            };

            let denom = ((second.sqrt()? / bias_correction2.sqrt())? + self.epsilon)?;
            let update = (m.div(&denom)? * (self.learning_rate / bias_correction1))?;
            var.set(&(param - update)?)?;

            self.momentum[i] = Some(m);
            self.variance[i] = Some(v);
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
