//! Routing of task-mixed batches to task heads

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::model::{TaskOutputs, SINGLE_HEAD};
use crate::training::loss::ValidOutDim;
use crate::training::metrics::AverageMeter;
use crate::training::tasks::TaskMetric;

/// Rows of a batch that belong to one task, taken from that task's head
#[derive(Debug, Clone)]
pub struct TaskSlice {
    /// Task name
    pub task: String,
    /// Head output for the matching rows
    pub preds: Tensor,
    /// Targets for the matching rows
    pub targets: Tensor,
    /// Number of matching rows
    pub count: usize,
}

/// Partitions a batch by task label
pub struct TaskRouter;

impl TaskRouter {
    /// Row indices whose label equals `task`
    pub fn indices(task: &str, labels: &[String]) -> Vec<u32> {
        labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.as_str() == task)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// One slice per head with at least one matching row, in head order
    pub fn route(preds: &TaskOutputs, targets: &Tensor, labels: &[String]) -> Result<Vec<TaskSlice>> {
        let batch = targets.dim(0)?;
        if batch != labels.len() {
            return Err(Error::invalid_input(format!(
                "{} targets but {} task labels",
                batch,
                labels.len()
            )));
        }

        let mut slices = Vec::new();
        for (task, output) in preds.iter() {
            let inds = Self::indices(task, labels);
            if inds.is_empty() {
                continue;
            }
            let count = inds.len();
            let index = Tensor::from_vec(inds, count, targets.device())?;
            slices.push(TaskSlice {
                task: task.to_string(),
                preds: output.index_select(&index, 0)?,
                targets: targets.index_select(&index, 0)?,
                count,
            });
        }
        Ok(slices)
    }

    /// Update `meter` with the task metric of a batch
    ///
    /// Single-head outputs are scored on the whole batch over the valid
    /// columns; multi-head outputs are scored per task and weighted by the
    /// number of matching rows.
    pub fn accumulate(
        meter: &mut AverageMeter,
        metric: TaskMetric,
        preds: &TaskOutputs,
        targets: &Tensor,
        labels: &[String],
        valid_out_dim: ValidOutDim,
    ) -> Result<()> {
        if let Some(output) = preds.get(SINGLE_HEAD) {
            let output = valid_out_dim.mask(output)?;
            meter.update(metric.compute(&output, targets)?, targets.dim(0)?);
            return Ok(());
        }

        for slice in Self::route(preds, targets, labels)? {
            meter.update(metric.compute(&slice.preds, &slice.targets)?, slice.count);
        }
        Ok(())
    }
}
