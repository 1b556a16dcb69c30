//! Epoch-based learning rate scheduling

use tracing::debug;

/// Step decay at fixed epoch milestones
///
/// At epoch `e` the rate is `base_lr * gamma^k` where `k` is the number of
/// milestones `<= e`.
#[derive(Debug, Clone)]
pub struct MultiStepScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Epoch milestones
    milestones: Vec<usize>,

    /// Decay factor applied at each milestone
    gamma: f64,

    /// Current learning rate
    current_lr: f64,

    /// Number of times the scheduler was stepped
    step_count: usize,
}

impl MultiStepScheduler {
    /// Create a scheduler with the usual decay factor of 0.1
    pub fn new(base_lr: f64, milestones: Vec<usize>) -> Self {
        Self::with_gamma(base_lr, milestones, 0.1)
    }

    /// Create a scheduler with a custom decay factor
    pub fn with_gamma(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            current_lr: base_lr,
            step_count: 0,
        }
    }

    /// Learning rate at `epoch`
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }

    /// Move to `epoch` and return the new learning rate
    pub fn step_to(&mut self, epoch: usize) -> f64 {
        self.step_count += 1;
        self.current_lr = self.lr_at(epoch);
        debug!("Scheduler at epoch {}: lr {}", epoch, self.current_lr);
        self.current_lr
    }

    /// Current learning rate
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Number of `step_to` calls
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Epoch milestones
    pub fn milestones(&self) -> &[usize] {
        &self.milestones
    }

    /// Reset scheduler to initial state
    pub fn reset(&mut self) {
        self.current_lr = self.base_lr;
        self.step_count = 0;
    }
}
