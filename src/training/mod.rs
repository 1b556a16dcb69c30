//! Training infrastructure for the agent
//!
//! This module provides the pieces the agent's training and validation loops
//! are assembled from.
//!
//! # Main Components
//!
//! - **Tasks**: task name to output mode, loss and metric
//! - **Router**: per-task slicing of task-mixed batches
//! - **Loss**: multi-head weighted loss and incremental-class masking
//! - **Metrics**: running averages, timers and metric functions
//! - **Optimizers**: SGD, RMSprop, Adam/AMSGrad, AdamW, Adagrad, Rprop and
//!   the multi-step learning rate schedule
//! - **Strategy**: single-device or sharded data-parallel execution
//! - **Data**: batches and the in-memory loader
//! - **Progress**: the agent's progress line sink
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use clagent::{Agent, AgentConfig};
//! use clagent::training::{TensorLoader, TensorLoaderConfig, RawInput};
//!
//! let mut agent = Agent::new(AgentConfig::default())?;
//! let mut train = TensorLoader::new(RawInput::Tensor(x), y, tasks, TensorLoaderConfig::default())?;
//! let metric = agent.learn_batch("All", &mut train, None)?;
//! ```

pub mod data;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod progress;
pub mod router;
pub mod strategy;
pub mod tasks;

// Data re-exports
pub use data::{Batch, BatchSource, RawInput, TensorLoader, TensorLoaderConfig};

// Loss re-exports
pub use loss::{BaseLoss, LossAggregator, ValidOutDim};

// Metrics re-exports
pub use metrics::{AverageMeter, Timer};

// Optimizer re-exports
pub use optimizers::{
    create_optimizer, MultiStepScheduler, Optimizer, OptimizerKind, OptimizerParams,
};

pub use progress::ProgressLog;
pub use router::{TaskRouter, TaskSlice};
pub use strategy::{DataParallel, ExecutionStrategy, SingleDevice, StepOutput};
pub use tasks::{OutputMode, TaskKind, TaskMetric};

#[cfg(test)]
mod tests;
