//! Task-aware loss aggregation
//!
//! Multi-head models are scored head by head on the rows whose task label
//! matches the head; the per-head means are re-weighted by their row counts
//! and averaged over the whole batch. Single-head models are scored on the
//! whole batch through the `All` head, restricted to the currently valid
//! output columns in the incremental-class scenario.

pub mod supervised;

pub use supervised::BaseLoss;

use std::fmt;

use candle_core::{DType, Tensor};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{TaskOutputs, SINGLE_HEAD};
use crate::training::router::TaskRouter;

/// Number of output columns that take part in loss and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidOutDim {
    /// Every column is active
    #[default]
    All,
    /// Only the first `n` columns are active
    Dims(usize),
}

impl ValidOutDim {
    /// Grow the active prefix by `dim` columns
    ///
    /// `All` first becomes `Dims(0)`; the state never returns to `All`.
    /// Returns the new column count.
    pub fn grow(&mut self, dim: usize) -> usize {
        let n = match *self {
            ValidOutDim::All => dim,
            ValidOutDim::Dims(n) => n + dim,
        };
        *self = ValidOutDim::Dims(n);
        n
    }

    /// Restrict `[N, C]` outputs to the active columns
    pub fn mask(&self, output: &Tensor) -> Result<Tensor> {
        match *self {
            ValidOutDim::All => Ok(output.clone()),
            ValidOutDim::Dims(0) => Err(Error::invalid_input(
                "no output dimension is valid yet; grow it before training or evaluating",
            )),
            ValidOutDim::Dims(n) => {
                let width = output.dim(1)?;
                Ok(output.narrow(1, 0, n.min(width))?)
            }
        }
    }
}

impl fmt::Display for ValidOutDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidOutDim::All => write!(f, "ALL"),
            ValidOutDim::Dims(n) => write!(f, "{n}"),
        }
    }
}

/// Combines head outputs into the scalar training loss
#[derive(Debug, Clone)]
pub struct LossAggregator {
    multihead: bool,
    valid_out_dim: ValidOutDim,
}

impl LossAggregator {
    /// Create an aggregator; `multihead` selects per-task routing
    pub fn new(multihead: bool) -> Self {
        Self {
            multihead,
            valid_out_dim: ValidOutDim::All,
        }
    }

    /// Whether losses are routed per task
    pub fn is_multihead(&self) -> bool {
        self.multihead
    }

    /// Current valid output dimension
    pub fn valid_out_dim(&self) -> ValidOutDim {
        self.valid_out_dim
    }

    /// Grow the valid output dimension and return the new column count
    pub fn add_valid_output_dim(&mut self, dim: usize) -> usize {
        self.valid_out_dim.grow(dim)
    }

    /// Scalar loss of a batch
    pub fn criterion(
        &self,
        preds: &TaskOutputs,
        targets: &Tensor,
        tasks: &[String],
        base: BaseLoss,
    ) -> Result<Tensor> {
        if self.multihead {
            self.multihead_loss(preds, targets, tasks, base)
        } else {
            self.single_head_loss(preds, targets, base)
        }
    }

    fn multihead_loss(
        &self,
        preds: &TaskOutputs,
        targets: &Tensor,
        tasks: &[String],
        base: BaseLoss,
    ) -> Result<Tensor> {
        let batch = targets.dim(0)?;
        let mut total: Option<Tensor> = None;
        for slice in TaskRouter::route(preds, targets, tasks)? {
            // restore the sum from the per-head mean
            let weighted = (base.compute(&slice.preds, &slice.targets)? * slice.count as f64)?;
            total = Some(match total {
                Some(acc) => (acc + weighted)?,
                None => weighted,
            });
        }

        match total {
            Some(total) => Ok((total / batch as f64)?),
            None => {
                debug!("No sample of the batch matched a configured head");
                Ok(Tensor::zeros((), DType::F32, targets.device())?)
            }
        }
    }

    fn single_head_loss(&self, preds: &TaskOutputs, targets: &Tensor, base: BaseLoss) -> Result<Tensor> {
        let output = preds
            .get(SINGLE_HEAD)
            .ok_or_else(|| {
                Error::unsupported_output(format!(
                    "single-head model produced heads [{}] without '{}'",
                    preds.tasks().join(", "),
                    SINGLE_HEAD
                ))
            })?;
        let output = self.valid_out_dim.mask(output)?;
        base.compute(&output, targets)
    }
}
