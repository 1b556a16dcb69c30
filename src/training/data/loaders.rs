//! In-memory data loader with optional seeded shuffling

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Batch, BatchSource, RawInput};
use crate::error::{Error, Result};

/// Configuration for [`TensorLoader`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle data at every pass
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Seed of the shuffling generator
    pub seed: u64,
}

impl Default for TensorLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Loader over a dataset held entirely in tensors
pub struct TensorLoader {
    input: RawInput,
    targets: Tensor,
    tasks: Vec<String>,
    config: TensorLoaderConfig,
    rng: StdRng,
}

impl TensorLoader {
    /// Create a loader; all parts must agree on the number of samples
    pub fn new(
        input: RawInput,
        targets: Tensor,
        tasks: Vec<String>,
        config: TensorLoaderConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch_size must be positive"));
        }
        // validates the sample counts
        let dataset = Batch::new(input, targets, tasks)?;
        debug!(
            "TensorLoader over {} samples, batch_size={}, shuffle={}",
            dataset.len(),
            config.batch_size,
            config.shuffle
        );

        Ok(Self {
            input: dataset.input,
            targets: dataset.targets,
            tasks: dataset.tasks,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        })
    }

    /// Number of samples
    pub fn dataset_size(&self) -> usize {
        self.tasks.len()
    }

    fn select(&self, rows: &[u32]) -> Result<Batch> {
        let index = Tensor::from_vec(rows.to_vec(), rows.len(), self.targets.device())?;
        let input = match &self.input {
            RawInput::Tensor(t) => RawInput::Tensor(t.index_select(&index, 0)?),
            RawInput::Sequence(parts) => RawInput::Sequence(
                parts
                    .iter()
                    .map(|t| t.index_select(&index, 0))
                    .collect::<candle_core::Result<Vec<_>>>()?,
            ),
        };
        Ok(Batch {
            input,
            targets: self.targets.index_select(&index, 0)?,
            tasks: rows.iter().map(|&i| self.tasks[i as usize].clone()).collect(),
        })
    }
}

impl BatchSource for TensorLoader {
    fn num_batches(&self) -> usize {
        let n = self.dataset_size();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut order: Vec<u32> = (0..self.dataset_size() as u32).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }

        let num_batches = self.num_batches();
        let batch_size = self.config.batch_size;
        let this = &*self;
        Box::new((0..num_batches).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(order.len());
            this.select(&order[start..end])
        }))
    }
}
