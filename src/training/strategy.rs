//! Execution strategies for one optimization step
//!
//! A strategy decides how a batch is pushed through forward and backward.
//! [`SingleDevice`] runs the batch as is. [`DataParallel`] splits it into
//! contiguous shards, back-propagates each shard's count-weighted loss and
//! sums the shard gradients into one store. The reduction completes before
//! the store is returned, so the optimizer always sees the full gradient.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::TaskOutputs;
use crate::training::data::Batch;

/// Forward pass of one (sub-)batch: scalar loss and head outputs
pub type ForwardFn<'a> = dyn Fn(&Batch) -> Result<(Tensor, TaskOutputs)> + 'a;

/// Result of forward and backward over a whole batch
pub struct StepOutput {
    /// Batch loss, detached
    pub loss: Tensor,
    /// Head outputs for every sample of the batch, detached
    pub outputs: TaskOutputs,
    /// Gradients of the batch loss
    pub grads: GradStore,
}

/// How forward and backward are executed for a batch
pub trait ExecutionStrategy: Send {
    /// Strategy name
    fn name(&self) -> &str;

    /// Forward and backward over `batch`; gradients cover every var in `vars`
    fn train_step(&self, batch: &Batch, vars: &[Var], forward: &ForwardFn) -> Result<StepOutput>;
}

/// Whole batch in one pass
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleDevice;

impl ExecutionStrategy for SingleDevice {
    fn name(&self) -> &str {
        "single_device"
    }

    fn train_step(&self, batch: &Batch, _vars: &[Var], forward: &ForwardFn) -> Result<StepOutput> {
        let (loss, outputs) = forward(batch)?;
        let grads = loss.backward()?;
        Ok(StepOutput {
            loss: loss.detach(),
            outputs: outputs.detach(),
            grads,
        })
    }
}

/// Batch split into shards whose gradients are summed
#[derive(Debug, Clone, Copy)]
pub struct DataParallel {
    shards: usize,
}

impl DataParallel {
    /// Split every batch into at most `shards` pieces
    pub fn new(shards: usize) -> Result<Self> {
        if shards == 0 {
            return Err(Error::config("data parallelism needs at least one shard"));
        }
        Ok(Self { shards })
    }

    /// Number of shards
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// `(start, len)` of each non-empty shard of `n` rows
    fn shard_bounds(&self, n: usize) -> Vec<(usize, usize)> {
        let shards = self.shards.min(n).max(1);
        let base = n / shards;
        let extra = n % shards;
        let mut bounds = Vec::with_capacity(shards);
        let mut start = 0;
        for k in 0..shards {
            let len = base + usize::from(k < extra);
            bounds.push((start, len));
            start += len;
        }
        bounds
    }
}

impl ExecutionStrategy for DataParallel {
    fn name(&self) -> &str {
        "data_parallel"
    }

    fn train_step(&self, batch: &Batch, vars: &[Var], forward: &ForwardFn) -> Result<StepOutput> {
        let n = batch.len();
        let bounds = self.shard_bounds(n);
        debug!("Splitting batch of {} into {} shards", n, bounds.len());

        let mut total_loss: Option<Tensor> = None;
        let mut outputs = Vec::with_capacity(bounds.len());
        let mut reduced: Option<GradStore> = None;

        for (start, len) in bounds {
            let shard = batch.narrow(start, len)?;
            let (loss, shard_outputs) = forward(&shard)?;
            // shard means weighted back to the full-batch mean
            let loss = (loss * (len as f64 / n as f64))?;
            let grads = loss.backward()?;

            reduced = Some(match reduced {
                None => grads,
                Some(mut acc) => {
                    for var in vars {
                        let Some(g) = grads.get(var.as_tensor()) else {
                            continue;
                        };
                        let sum = match acc.get(var.as_tensor()) {
                            Some(prev) => (prev + g)?,
                            None => g.clone(),
                        };
                        acc.insert(var.as_tensor(), sum);
                    }
                    acc
                }
            });

            let loss = loss.detach();
            total_loss = Some(match total_loss {
                Some(acc) => (acc + loss)?,
                None => loss,
            });
            outputs.push(shard_outputs.detach());
        }

        match (total_loss, reduced) {
            (Some(loss), Some(grads)) => Ok(StepOutput {
                loss,
                outputs: TaskOutputs::concat(&outputs)?,
                grads,
            }),
            _ => Err(Error::invalid_input("cannot run a training step on an empty batch")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSpec, TaskHead};
    use crate::model::{build_model, ModelInput};
    use crate::training::data::RawInput;
    use crate::training::loss::{BaseLoss, LossAggregator};
    use crate::training::tests::assert_tensor_close;
    use anyhow::Result;
    use candle_core::Device;

    #[test]
    fn test_shard_bounds_cover_batch() -> Result<()> {
        let dp = DataParallel::new(3)?;
        assert_eq!(dp.shard_bounds(7), vec![(0, 3), (3, 2), (5, 2)]);
        assert_eq!(dp.shard_bounds(2), vec![(0, 1), (1, 1)]);
        assert!(DataParallel::new(0).is_err());
        Ok(())
    }

    #[test]
    fn test_data_parallel_matches_single_device_gradients() -> Result<()> {
        let device = Device::Cpu;
        let heads = vec![TaskHead::new("a", 2), TaskHead::new("b", 3)];
        let model = build_model(&ModelSpec::Mlp { in_dim: 4, hidden: vec![5] }, &heads, &device)?;
        let aggregator = LossAggregator::new(true);

        let x = Tensor::randn(0f32, 1.0, (6, 4), &device)?;
        let batch = Batch::new(
            RawInput::Tensor(x),
            Tensor::new(&[0u32, 2, 1, 1, 0, 2], &device)?,
            ["a", "b", "b", "a", "b", "a"].iter().map(|s| s.to_string()).collect(),
        )?;

        let forward = |b: &Batch| -> crate::error::Result<(Tensor, TaskOutputs)> {
            let RawInput::Tensor(x) = &b.input else {
                return Err(Error::invalid_input("dense input expected"));
            };
            let out = model.forward(&ModelInput::Dense(x.clone()), true)?;
            let loss = aggregator.criterion(&out, &b.targets, &b.tasks, BaseLoss::CrossEntropy)?;
            Ok((loss, out))
        };

        let vars = model.var_map().all_vars();
        let single = SingleDevice.train_step(&batch, &vars, &forward)?;
        let parallel = DataParallel::new(3)?.train_step(&batch, &vars, &forward)?;

        let l1 = single.loss.to_scalar::<f32>()?;
        let l2 = parallel.loss.to_scalar::<f32>()?;
        assert!((l1 - l2).abs() < 1e-5, "loss {l1} vs {l2}");

        assert_eq!(parallel.outputs.get("a").map(|t| t.dims().to_vec()), Some(vec![6, 2]));
        for var in &vars {
            let g1 = single.grads.get(var.as_tensor()).map(|g| g.flatten_all()).transpose()?;
            let g2 = parallel.grads.get(var.as_tensor()).map(|g| g.flatten_all()).transpose()?;
            let (Some(g1), Some(g2)) = (g1, g2) else {
                continue;
            };
            assert_tensor_close(&g1, &g2, 1e-4)?;
        }
        Ok(())
    }
}
